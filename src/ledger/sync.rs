//! Sync Ledger: one transferred segment key per line

use super::{Ledger, LedgerRecord};
use crate::error::LedgerError;
use crate::validation::validate_segment_key;

/// A segment recorded as transferred
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SyncEntry {
	pub key: String,
}

impl SyncEntry {
	pub fn new(key: impl Into<String>) -> Self {
		SyncEntry { key: key.into() }
	}
}

impl LedgerRecord for SyncEntry {
	fn key(&self) -> &str {
		&self.key
	}

	fn parse(line: &str) -> Result<Self, String> {
		let key = line.trim();
		validate_segment_key(key).map_err(|e| e.to_string())?;
		Ok(SyncEntry::new(key))
	}

	fn render(&self) -> String {
		self.key.clone()
	}
}

/// Ledger of segments the Transfer Engine has moved
pub type SyncLedger = Ledger<SyncEntry>;

impl Ledger<SyncEntry> {
	/// Record a confirmed batch in one pass
	pub async fn append_keys(&mut self, keys: &[String]) -> Result<usize, LedgerError> {
		self.append_batch(keys.iter().map(SyncEntry::new).collect()).await
	}

	/// Transferred keys in ledger key order
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.records().map(|entry| entry.key.as_str())
	}
}


// vim: ts=4
