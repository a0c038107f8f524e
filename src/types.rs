//! Shared types of the replication pipeline

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// A recorded file in a Segment Store
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Segment {
	/// Ledger key: path relative to the store root, forward slashes
	pub key: String,
	/// Absolute path on this node
	pub path: PathBuf,
	pub size: u64,
	pub mtime: SystemTime,
}

impl Segment {
	/// Time since last modification (zero if the mtime is in the future)
	pub fn age(&self, now: SystemTime) -> Duration {
		now.duration_since(self.mtime).unwrap_or(Duration::ZERO)
	}
}

/// Outcome of the completeness check for one file
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Completeness {
	/// Old enough and size stable across the settling delay
	Complete,
	/// Still being written, or not old enough yet
	Incomplete,
	/// Missing or metadata unreadable
	Unreadable,
}

/// Terminal verification verdict
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verdict {
	Matches,
	Mismatch,
}

impl Verdict {
	pub fn as_str(&self) -> &'static str {
		match self {
			Verdict::Matches => "matches",
			Verdict::Mismatch => "mismatch",
		}
	}

	pub fn parse(s: &str) -> Option<Verdict> {
		match s {
			"matches" | "match" => Some(Verdict::Matches),
			"mismatch" => Some(Verdict::Mismatch),
			_ => None,
		}
	}
}

impl fmt::Display for Verdict {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Lifecycle of a segment as derived from the ledgers
///
/// Transitions only move forward. `Mismatch` branches off `Transferred` and
/// never reaches `Reclaimed`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum SegmentState {
	Observed,
	Complete,
	Transferred,
	Verified,
	Mismatch,
	Reclaimed,
}

impl fmt::Display for SegmentState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SegmentState::Observed => "observed",
			SegmentState::Complete => "complete",
			SegmentState::Transferred => "transferred",
			SegmentState::Verified => "verified",
			SegmentState::Mismatch => "mismatch",
			SegmentState::Reclaimed => "reclaimed",
		};
		f.write_str(name)
	}
}

/// Why a cycle did not run its stages
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CycleOutcome {
	Completed,
	/// Precondition gate refused the cycle
	Skipped { reason: String },
	/// A stage failed; later stages did not run
	Aborted { reason: String },
}

/// What one pipeline pass did
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CycleReport {
	pub outcome: CycleOutcome,
	/// Segments seen in the store that are not yet in the Sync Ledger
	pub candidates: usize,
	/// Candidates still being written or too young
	pub incomplete: usize,
	pub unreadable: usize,
	/// Keys appended to the Sync Ledger this cycle
	pub transferred: Vec<String>,
	/// Batch failed after all attempts and will be retried next cycle
	pub transfer_failed: bool,
	pub verified: Vec<String>,
	pub mismatched: Vec<String>,
	/// Verification could not run this cycle (missing copy, exchange down)
	pub verify_deferred: usize,
	pub reclaimed: Vec<String>,
	pub bytes_reclaimed: u64,
}

impl CycleReport {
	pub fn new() -> Self {
		CycleReport {
			outcome: CycleOutcome::Completed,
			candidates: 0,
			incomplete: 0,
			unreadable: 0,
			transferred: vec![],
			transfer_failed: false,
			verified: vec![],
			mismatched: vec![],
			verify_deferred: 0,
			reclaimed: vec![],
			bytes_reclaimed: 0,
		}
	}

	pub fn skipped(reason: String) -> Self {
		CycleReport { outcome: CycleOutcome::Skipped { reason }, ..CycleReport::new() }
	}

	/// True when the pass changed nothing on disk or in the ledgers
	pub fn is_idle(&self) -> bool {
		self.transferred.is_empty()
			&& self.verified.is_empty()
			&& self.mismatched.is_empty()
			&& self.reclaimed.is_empty()
	}
}

impl Default for CycleReport {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_verdict_round_trip_names() {
		assert_eq!(Verdict::parse(Verdict::Matches.as_str()), Some(Verdict::Matches));
		assert_eq!(Verdict::parse("mismatch"), Some(Verdict::Mismatch));
		assert_eq!(Verdict::parse("MATCHES"), None);
	}

	#[test]
	fn test_segment_age_future_mtime() {
		let now = SystemTime::now();
		let seg = Segment {
			key: "seg.wav".to_string(),
			path: PathBuf::from("/rec/seg.wav"),
			size: 10,
			mtime: now + Duration::from_secs(30),
		};
		assert_eq!(seg.age(now), Duration::ZERO);
	}

	#[test]
	fn test_state_order_is_monotonic() {
		assert!(SegmentState::Observed < SegmentState::Complete);
		assert!(SegmentState::Transferred < SegmentState::Verified);
		assert!(SegmentState::Verified < SegmentState::Reclaimed);
	}

	#[test]
	fn test_skipped_report_is_idle() {
		let report = CycleReport::skipped("not mounted".to_string());
		assert!(report.is_idle());
		assert!(matches!(report.outcome, CycleOutcome::Skipped { .. }));
	}
}

// vim: ts=4
