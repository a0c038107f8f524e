//! Verification Ledger: `path,verdict,source_digest,destination_digest`
//!
//! Fields are split from the right, so a segment path may itself contain
//! commas. Only a `matches` record authorizes reclamation.

use super::{Ledger, LedgerRecord};
use crate::types::Verdict;
use crate::validation::validate_segment_key;

/// Outcome of comparing the two digests of one segment
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerificationRecord {
	pub key: String,
	pub verdict: Verdict,
	pub source_digest: String,
	pub destination_digest: String,
}

impl VerificationRecord {
	pub fn new(key: impl Into<String>, source_digest: String, destination_digest: String) -> Self {
		let verdict = if crate::verify::digests_equal(&source_digest, &destination_digest) {
			Verdict::Matches
		} else {
			Verdict::Mismatch
		};
		VerificationRecord { key: key.into(), verdict, source_digest, destination_digest }
	}
}

impl LedgerRecord for VerificationRecord {
	fn key(&self) -> &str {
		&self.key
	}

	fn parse(line: &str) -> Result<Self, String> {
		let mut fields = line.rsplitn(4, ',');
		let destination_digest = fields.next().map(str::trim).unwrap_or_default();
		let source_digest = fields.next().map(str::trim).ok_or("missing source digest")?;
		let verdict = fields.next().map(str::trim).ok_or("missing verdict")?;
		let key = fields.next().map(str::trim).ok_or("missing segment path")?;

		validate_segment_key(key).map_err(|e| e.to_string())?;
		let verdict = Verdict::parse(verdict).ok_or_else(|| format!("unknown verdict '{}'", verdict))?;
		for digest in [source_digest, destination_digest] {
			if digest.is_empty() || hex::decode(digest).is_err() {
				return Err(format!("'{}' is not a hex digest", digest));
			}
		}

		Ok(VerificationRecord {
			key: key.to_string(),
			verdict,
			source_digest: source_digest.to_string(),
			destination_digest: destination_digest.to_string(),
		})
	}

	fn render(&self) -> String {
		format!("{},{},{},{}", self.key, self.verdict, self.source_digest, self.destination_digest)
	}
}

/// Ledger of terminal verification verdicts
pub type VerificationLedger = Ledger<VerificationRecord>;

impl Ledger<VerificationRecord> {
	pub fn verdict(&self, key: &str) -> Option<Verdict> {
		self.get(key).map(|record| record.verdict)
	}

	/// Whether the Retention Manager may delete this segment
	pub fn is_reclaimable(&self, key: &str) -> bool {
		self.verdict(key) == Some(Verdict::Matches)
	}

	/// Segments blocked until an operator intervenes
	pub fn mismatches(&self) -> impl Iterator<Item = &VerificationRecord> {
		self.records().filter(|record| record.verdict == Verdict::Mismatch)
	}
}


// vim: ts=4
