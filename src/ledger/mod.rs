//! Append-only ledgers
//!
//! A ledger is a newline-delimited text file replayed into an in-memory map at
//! open time. Every durable transition is one append followed by `sync_data`;
//! the map is only updated once the append is on disk. The core never rewrites
//! or compacts a ledger file, so operators can inspect and hand-edit them.
//!
//! A crash mid-append can leave a final line without its newline. Such a torn
//! tail was never committed: it is ignored on load and cut off by the next
//! append. Complete lines are never touched.

mod sync;
mod verification;

pub use sync::{SyncEntry, SyncLedger};
pub use verification::{VerificationLedger, VerificationRecord};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::AsyncWriteExt;

use crate::error::LedgerError;
use crate::logging::*;
use crate::validation::validate_segment_key;

/// One line of a ledger
pub trait LedgerRecord: Clone + Send + Sync {
	/// Segment key the record is about
	fn key(&self) -> &str;

	/// Parse one non-empty line
	fn parse(line: &str) -> Result<Self, String>;

	/// Render as one line, without the trailing newline
	fn render(&self) -> String;
}

/// Durable append-only log of records keyed by segment path
#[derive(Debug)]
pub struct Ledger<R> {
	path: PathBuf,
	records: BTreeMap<String, R>,
	/// Length of the file up to its last complete line
	committed_len: u64,
	torn_tail: bool,
}

impl<R: LedgerRecord> Ledger<R> {
	/// Open a ledger, replaying the file if it exists
	pub async fn open(path: &Path) -> Result<Self, LedgerError> {
		let mut ledger = Ledger {
			path: path.to_path_buf(),
			records: BTreeMap::new(),
			committed_len: 0,
			torn_tail: false,
		};

		let bytes = match afs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("Ledger {} does not exist yet, starting empty", path.display());
				return Ok(ledger);
			}
			Err(e) => {
				return Err(LedgerError::LoadFailed { path: path.display().to_string(), source: e })
			}
		};

		ledger.committed_len = bytes.iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0) as u64;
		let contents = String::from_utf8_lossy(&bytes);
		let mut lines: Vec<&str> = contents.split('\n').collect();

		// split() leaves "" after a trailing newline; anything else is a torn write
		if let Some(last) = lines.pop() {
			if !last.is_empty() {
				warn!(
					"Ledger {} ends with an incomplete line {:?}, ignoring it",
					path.display(),
					last
				);
				ledger.torn_tail = true;
			}
		}

		for (idx, line) in lines.iter().enumerate() {
			let line = line.trim_end_matches('\r');
			if line.trim().is_empty() {
				continue;
			}
			match R::parse(line) {
				Ok(record) => {
					let key = record.key().to_string();
					if ledger.records.contains_key(&key) {
						warn!(
							"Ledger {} line {}: duplicate entry for {}, keeping the first",
							path.display(),
							idx + 1,
							key
						);
						continue;
					}
					ledger.records.insert(key, record);
				}
				Err(reason) => {
					warn!("Ledger {} line {}: skipping malformed line: {}", path.display(), idx + 1, reason);
				}
			}
		}

		debug!("Loaded {} records from {}", ledger.records.len(), path.display());
		Ok(ledger)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn contains(&self, key: &str) -> bool {
		self.records.contains_key(key)
	}

	pub fn get(&self, key: &str) -> Option<&R> {
		self.records.get(key)
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Records in key order
	pub fn records(&self) -> impl Iterator<Item = &R> {
		self.records.values()
	}

	/// Durably append one record; returns false if the key is already present
	pub async fn append(&mut self, record: R) -> Result<bool, LedgerError> {
		Ok(self.append_batch(vec![record]).await? == 1)
	}

	/// Durably append several records with a single write
	///
	/// Records whose key is already present (or repeated within the batch) are
	/// dropped. Returns the number of records written.
	pub async fn append_batch(&mut self, records: Vec<R>) -> Result<usize, LedgerError> {
		let mut fresh: Vec<R> = Vec::with_capacity(records.len());
		for record in records {
			validate_segment_key(record.key())
				.map_err(|e| LedgerError::InvalidRecord { message: e.to_string() })?;
			if self.contains(record.key()) || fresh.iter().any(|r| r.key() == record.key()) {
				continue;
			}
			fresh.push(record);
		}
		if fresh.is_empty() {
			return Ok(0);
		}

		let mut buf = String::new();
		for record in &fresh {
			let line = record.render();
			if line.contains('\n') {
				return Err(LedgerError::InvalidRecord {
					message: format!("rendered record for {} spans lines", record.key()),
				});
			}
			buf.push_str(&line);
			buf.push('\n');
		}

		match self.write_durably(buf.as_bytes()).await {
			Ok(len) => {
				self.committed_len = len;
				self.torn_tail = false;
			}
			Err(e) => {
				// Whatever landed is uncommitted and gets cut off next time
				self.torn_tail = true;
				return Err(LedgerError::AppendFailed { path: self.path.display().to_string(), source: e });
			}
		}

		let count = fresh.len();
		for record in fresh {
			self.records.insert(record.key().to_string(), record);
		}
		Ok(count)
	}

	/// Append `data` and sync; returns the new file length
	async fn write_durably(&self, data: &[u8]) -> std::io::Result<u64> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				afs::create_dir_all(parent).await?;
			}
		}
		let mut file = afs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
		if self.torn_tail {
			file.set_len(self.committed_len).await?;
		}
		file.write_all(data).await?;
		file.flush().await?;
		file.sync_data().await?;
		Ok(file.metadata().await?.len())
	}
}


// vim: ts=4
