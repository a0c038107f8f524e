//! Integrity Verifier
//!
//! Independently of whatever the transfer primitive reported, every segment
//! in the Sync Ledger is digested on both sides and the verdict appended to
//! the Verification Ledger. A verdict is terminal: `matches` authorizes
//! reclamation, `mismatch` blocks it until an operator intervenes. Segments
//! whose digests cannot be obtained this cycle stay pending.

mod digest;
mod exchange;

pub use digest::{digest_file, digests_equal};
pub use exchange::{
	exchange_from_config, DigestExchange, DigestRequest, DigestResponse, LocalDigestExchange, Peer,
	PeerConnector, RemoteDigestExchange, SshConnector,
};

use std::path::PathBuf;

use crate::config::Config;
use crate::error::RelayError;
use crate::ledger::{SyncLedger, VerificationLedger, VerificationRecord};
use crate::logging::*;
use crate::types::Verdict;

/// What one verification pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
	pub verified: Vec<String>,
	pub mismatched: Vec<String>,
	/// Pending segments that could not be digested this pass
	pub deferred: usize,
}

pub struct IntegrityVerifier {
	destination_root: PathBuf,
	chunk_size: usize,
	exchange: Box<dyn DigestExchange>,
	dry_run: bool,
}

impl IntegrityVerifier {
	pub fn new(config: &Config, exchange: Box<dyn DigestExchange>) -> Self {
		IntegrityVerifier {
			destination_root: config.destination_dir.clone(),
			chunk_size: config.verify.chunk_size,
			exchange,
			dry_run: config.dry_run,
		}
	}

	/// Verify every synced segment that has no verdict yet
	///
	/// Returns `Err` only when the Verification Ledger cannot be appended.
	pub async fn verify_pending(
		&mut self,
		synced: &SyncLedger,
		verification: &mut VerificationLedger,
	) -> Result<VerifyReport, RelayError> {
		let pending: Vec<String> =
			synced.keys().filter(|key| !verification.contains(key)).map(str::to_string).collect();
		let mut report = VerifyReport::default();
		if pending.is_empty() {
			debug!("No segments awaiting verification");
			return Ok(report);
		}
		info!("Verifying {} transferred segments", pending.len());

		for key in pending {
			let destination = self.destination_root.join(&key);
			let (destination_digest, source_digest) = futures::join!(
				digest_file(&destination, self.chunk_size),
				self.exchange.source_digest(&key)
			);

			let destination_digest = match destination_digest {
				Ok(digest) => digest,
				Err(e) => {
					warn!("Cannot digest destination copy of {}: {} (retrying next cycle)", key, e);
					report.deferred += 1;
					continue;
				}
			};
			let source_digest = match source_digest {
				Ok(Some(digest)) => digest,
				Ok(None) => {
					warn!("Source copy of {} is missing (retrying next cycle)", key);
					report.deferred += 1;
					continue;
				}
				Err(e) => {
					warn!("Cannot obtain source digest of {}: {} (retrying next cycle)", key, e);
					report.deferred += 1;
					continue;
				}
			};

			let record = VerificationRecord::new(key.clone(), source_digest, destination_digest);
			if self.dry_run {
				info!("[DRY-RUN] {} would be recorded as {}", key, record.verdict);
				continue;
			}

			let verdict = record.verdict;
			verification.append(record).await?;
			match verdict {
				Verdict::Matches => {
					info!("Verification OK for {}", key);
					report.verified.push(key);
				}
				Verdict::Mismatch => {
					error!(
						"Verification FAILED for {}: digests differ, segment will never be reclaimed",
						key
					);
					report.mismatched.push(key);
				}
			}
		}

		Ok(report)
	}
}


// vim: ts=4
