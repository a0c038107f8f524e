//! Retention Manager
//!
//! Runs on the producing node only. When the Segment Store is over budget,
//! segments with a `matches` verdict are deleted oldest-first (by mtime), and
//! usage is measured again after each deletion. Nothing without a `matches`
//! record is ever deleted, so a store full of unverified or mismatched
//! segments simply stays over budget and is reported.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as afs;

use crate::config::{Config, RetentionBudget};
use crate::detector::{scan_segments, SegmentMatcher};
use crate::ledger::VerificationLedger;
use crate::logging::*;
use crate::types::Segment;

/// Current footprint of a Segment Store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
	/// Bytes of every regular file under the store
	pub bytes: u64,
	/// Number of segment files
	pub files: usize,
}

/// What one retention pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
	pub reclaimed: Vec<String>,
	pub bytes_reclaimed: u64,
	/// Deletions that failed and were skipped
	pub failed: usize,
	/// Still over budget with no verified candidates left
	pub exhausted: bool,
	pub usage_before: StoreUsage,
	pub usage_after: StoreUsage,
}

/// Sum file sizes under `root` and count the segments among them
pub async fn measure_store(root: &Path, matcher: &SegmentMatcher) -> io::Result<StoreUsage> {
	let mut usage = StoreUsage::default();
	let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

	while let Some(dir) = pending.pop() {
		let mut entries = match afs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if dir.as_path() == root => return Err(e),
			Err(e) => {
				warn!("Cannot read directory {}: {} (not counted)", dir.display(), e);
				continue;
			}
		};
		while let Some(entry) = entries.next_entry().await? {
			let meta = match entry.metadata().await {
				Ok(meta) => meta,
				Err(_) => continue,
			};
			if meta.is_dir() {
				pending.push(entry.path());
			} else if meta.is_file() {
				usage.bytes += meta.len();
				let path = entry.path();
				if let Ok(rel) = path.strip_prefix(root) {
					let key = crate::validation::segment_key(rel);
					if key.map(|key| matcher.is_segment(&key)).unwrap_or(false) {
						usage.files += 1;
					}
				}
			}
		}
	}

	Ok(usage)
}

pub struct RetentionManager {
	root: PathBuf,
	budget: RetentionBudget,
	matcher: SegmentMatcher,
	dry_run: bool,
}

impl RetentionManager {
	pub fn new(config: &Config, matcher: SegmentMatcher) -> Self {
		RetentionManager {
			root: config.source_dir.clone(),
			budget: config.retention.clone(),
			matcher,
			dry_run: config.dry_run,
		}
	}

	/// Delete verified segments, oldest first, until the store is within budget
	pub async fn reclaim(&self, verification: &VerificationLedger) -> io::Result<RetentionReport> {
		let mut report = RetentionReport::default();
		if self.budget.is_unbounded() {
			debug!("No retention budget configured");
			return Ok(report);
		}

		let usage = measure_store(&self.root, &self.matcher).await?;
		report.usage_before = usage;
		report.usage_after = usage;
		if !self.budget.exceeded_by(usage.bytes, usage.files) {
			debug!("Store within budget: {} bytes in {} segments", usage.bytes, usage.files);
			return Ok(report);
		}

		info!(
			"Store over budget: {} bytes in {} segments (max bytes {:?}, max files {:?})",
			usage.bytes, usage.files, self.budget.max_bytes, self.budget.max_files
		);

		let candidates = self.candidates(verification).await?;
		self.remove_oldest(candidates, verification, usage, report).await
	}

	/// Verified segments in deletion order: oldest mtime first, key breaks ties
	async fn candidates(&self, verification: &VerificationLedger) -> io::Result<Vec<Segment>> {
		let mut candidates: Vec<Segment> = scan_segments(&self.root, &self.matcher)
			.await?
			.into_iter()
			.filter(|segment| verification.is_reclaimable(&segment.key))
			.collect();
		candidates.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.key.cmp(&b.key)));
		Ok(candidates)
	}

	async fn remove_oldest(
		&self,
		candidates: Vec<Segment>,
		verification: &VerificationLedger,
		mut usage: StoreUsage,
		mut report: RetentionReport,
	) -> io::Result<RetentionReport> {
		let mut candidates = candidates.into_iter();

		while self.budget.exceeded_by(usage.bytes, usage.files) {
			let segment = match candidates.next() {
				Some(segment) => segment,
				None => {
					warn!(
						"Still over budget ({} bytes in {} segments) but no verified segments left to remove",
						usage.bytes, usage.files
					);
					report.exhausted = true;
					break;
				}
			};

			if !verification.is_reclaimable(&segment.key) {
				continue;
			}

			if self.dry_run {
				info!("[DRY-RUN] Would remove {} ({} bytes)", segment.key, segment.size);
				usage.bytes = usage.bytes.saturating_sub(segment.size);
				usage.files = usage.files.saturating_sub(1);
				report.reclaimed.push(segment.key);
				report.bytes_reclaimed += segment.size;
				continue;
			}

			match afs::remove_file(&segment.path).await {
				Ok(()) => {
					info!("Removed {} ({} bytes, verified at destination)", segment.key, segment.size);
					report.bytes_reclaimed += segment.size;
					report.reclaimed.push(segment.key);
				}
				Err(e) => {
					error!("Failed to remove {}: {} (skipping)", segment.key, e);
					report.failed += 1;
					continue;
				}
			}

			usage = measure_store(&self.root, &self.matcher).await?;
		}

		report.usage_after = usage;
		Ok(report)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::VerificationRecord;
	use filetime::FileTime;
	use tempfile::TempDir;

	const D: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
	const E: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

	fn write_segment(root: &Path, key: &str, size: usize, mtime: i64) {
		let path = root.join(key);
		std::fs::write(&path, vec![0u8; size]).unwrap();
		filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
	}

	fn manager(root: &Path, budget: RetentionBudget, dry_run: bool) -> RetentionManager {
		let config =
			Config { source_dir: root.to_path_buf(), retention: budget, dry_run, ..Config::default() };
		let matcher = SegmentMatcher::new(&config.segment_patterns).unwrap();
		RetentionManager::new(&config, matcher)
	}

	async fn ledger(dir: &Path, matches: &[&str], mismatches: &[&str]) -> VerificationLedger {
		let mut ledger = VerificationLedger::open(&dir.join("verified.log")).await.unwrap();
		for key in matches {
			ledger.append(VerificationRecord::new(*key, D.to_string(), D.to_string())).await.unwrap();
		}
		for key in mismatches {
			ledger.append(VerificationRecord::new(*key, D.to_string(), E.to_string())).await.unwrap();
		}
		ledger
	}

	#[tokio::test]
	async fn test_deletes_exactly_the_oldest_verified() {
		let store = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		write_segment(store.path(), "s1.wav", 100, 1_000);
		write_segment(store.path(), "s2.wav", 100, 2_000);
		write_segment(store.path(), "s3.wav", 100, 3_000);
		write_segment(store.path(), "s4.wav", 100, 4_000);
		let ledger = ledger(state.path(), &["s1.wav", "s2.wav", "s3.wav", "s4.wav"], &[]).await;

		let budget = RetentionBudget { max_files: Some(2), max_bytes: None };
		let report = manager(store.path(), budget, false).reclaim(&ledger).await.unwrap();

		assert_eq!(report.reclaimed, vec!["s1.wav", "s2.wav"]);
		assert_eq!(report.bytes_reclaimed, 200);
		assert!(!store.path().join("s1.wav").exists());
		assert!(store.path().join("s3.wav").exists());
		assert_eq!(report.usage_after, StoreUsage { bytes: 200, files: 2 });
	}

	#[tokio::test]
	async fn test_never_deletes_unverified_or_mismatched() {
		let store = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		write_segment(store.path(), "old_mismatch.wav", 500, 1_000);
		write_segment(store.path(), "old_pending.wav", 500, 1_500);
		write_segment(store.path(), "newer_ok.wav", 500, 2_000);
		let ledger = ledger(state.path(), &["newer_ok.wav"], &["old_mismatch.wav"]).await;

		let budget = RetentionBudget { max_bytes: Some(100), max_files: None };
		let report = manager(store.path(), budget, false).reclaim(&ledger).await.unwrap();

		assert_eq!(report.reclaimed, vec!["newer_ok.wav"]);
		assert!(report.exhausted);
		assert!(store.path().join("old_mismatch.wav").exists());
		assert!(store.path().join("old_pending.wav").exists());
	}

	#[tokio::test]
	async fn test_failed_removal_moves_on_to_next_candidate() {
		let store = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		write_segment(store.path(), "s1.wav", 100, 1_000);
		write_segment(store.path(), "s2.wav", 100, 2_000);
		write_segment(store.path(), "s3.wav", 100, 3_000);
		let ledger = ledger(state.path(), &["s1.wav", "s2.wav", "s3.wav"], &[]).await;

		let budget = RetentionBudget { max_files: Some(2), max_bytes: None };
		let manager = manager(store.path(), budget, false);
		let usage = measure_store(store.path(), &manager.matcher).await.unwrap();
		let candidates = manager.candidates(&ledger).await.unwrap();
		assert_eq!(candidates[0].key, "s1.wav");

		// s1.wav turns into a non-empty directory after the scan
		let stuck = store.path().join("s1.wav");
		std::fs::remove_file(&stuck).unwrap();
		std::fs::create_dir(&stuck).unwrap();
		std::fs::write(stuck.join("take.bin"), vec![0u8; 10]).unwrap();

		let report =
			manager.remove_oldest(candidates, &ledger, usage, RetentionReport::default()).await.unwrap();

		assert_eq!(report.failed, 1);
		assert_eq!(report.reclaimed, vec!["s2.wav"]);
		assert!(stuck.is_dir());
		assert!(store.path().join("s3.wav").exists());
		assert_eq!(report.usage_after.files, 1);
	}

	#[tokio::test]
	async fn test_within_budget_is_untouched() {
		let store = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		write_segment(store.path(), "s1.wav", 100, 1_000);
		let ledger = ledger(state.path(), &["s1.wav"], &[]).await;

		let budget = RetentionBudget { max_bytes: Some(1_000), max_files: Some(10) };
		let report = manager(store.path(), budget, false).reclaim(&ledger).await.unwrap();

		assert!(report.reclaimed.is_empty());
		assert!(store.path().join("s1.wav").exists());
	}

	#[tokio::test]
	async fn test_dry_run_keeps_files() {
		let store = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		write_segment(store.path(), "s1.wav", 100, 1_000);
		write_segment(store.path(), "s2.wav", 100, 2_000);
		let ledger = ledger(state.path(), &["s1.wav", "s2.wav"], &[]).await;

		let budget = RetentionBudget { max_files: Some(1), max_bytes: None };
		let report = manager(store.path(), budget, true).reclaim(&ledger).await.unwrap();

		assert_eq!(report.reclaimed, vec!["s1.wav"]);
		assert!(store.path().join("s1.wav").exists());
	}

	#[tokio::test]
	async fn test_measure_counts_all_bytes_but_only_segments() {
		let store = TempDir::new().unwrap();
		write_segment(store.path(), "s1.wav", 100, 1_000);
		std::fs::write(store.path().join("notes.txt"), vec![0u8; 50]).unwrap();

		let matcher = SegmentMatcher::new(&["*.wav".to_string()]).unwrap();
		let usage = measure_store(store.path(), &matcher).await.unwrap();
		assert_eq!(usage, StoreUsage { bytes: 150, files: 1 });
	}
}

// vim: ts=4
