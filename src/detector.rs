//! Segment Store scanning and completeness detection
//!
//! The recorder gives no completion signal, so a segment counts as finished
//! when it has not been modified for longer than the modification threshold
//! AND its size does not change across a settling delay. A recorder that
//! stalls mid-write for longer than both will still be misread as finished;
//! the stability check is the only guard against that.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs as afs;

use crate::logging::*;
use crate::transfer::TEMP_SUFFIX;
use crate::types::{Completeness, Segment};
use crate::validation::{segment_key, validate_segment_key, ValidationError};

/// Decides which files in a store are segments at all
#[derive(Debug, Clone)]
pub struct SegmentMatcher {
	globs: GlobSet,
}

impl SegmentMatcher {
	pub fn new(patterns: &[String]) -> Result<Self, ValidationError> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			let glob = Glob::new(pattern).map_err(|e| {
				ValidationError::ConfigError(format!("Invalid segment pattern '{}': {}", pattern, e))
			})?;
			builder.add(glob);
		}
		let globs = builder
			.build()
			.map_err(|e| ValidationError::ConfigError(format!("Invalid segment patterns: {}", e)))?;
		Ok(SegmentMatcher { globs })
	}

	/// Match a store-relative key; hidden and in-flight temp files never match
	pub fn is_segment(&self, key: &str) -> bool {
		let name = key.rsplit('/').next().unwrap_or(key);
		if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
			return false;
		}
		self.globs.is_match(key)
	}
}

/// List every segment under `root`, recursively
///
/// An unreadable subdirectory is logged and skipped; an unreadable root is an
/// error because the store itself is unavailable. Files whose name cannot be
/// a ledger key are logged and left out.
pub async fn scan_segments(root: &Path, matcher: &SegmentMatcher) -> io::Result<Vec<Segment>> {
	let mut segments = Vec::new();
	let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

	while let Some(dir) = pending.pop() {
		let mut entries = match afs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if dir.as_path() == root => return Err(e),
			Err(e) => {
				warn!("Cannot read directory {}: {} (skipping)", dir.display(), e);
				continue;
			}
		};

		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			let file_type = match entry.file_type().await {
				Ok(ft) => ft,
				Err(e) => {
					warn!("Cannot stat {}: {} (skipping)", path.display(), e);
					continue;
				}
			};

			if file_type.is_dir() {
				pending.push(path);
				continue;
			}
			if !file_type.is_file() {
				continue;
			}

			let rel = match path.strip_prefix(root) {
				Ok(rel) => rel,
				Err(_) => continue,
			};
			let key = match segment_key(rel) {
				Some(key) => key,
				None => {
					warn!("Skipping {}: file name is not valid UTF-8", path.display());
					continue;
				}
			};
			if !matcher.is_segment(&key) {
				continue;
			}
			if let Err(e) = validate_segment_key(&key) {
				warn!("Skipping {}: {}", path.display(), e);
				continue;
			}

			match entry.metadata().await {
				Ok(meta) => segments.push(Segment {
					key,
					size: meta.len(),
					mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
					path,
				}),
				Err(e) => warn!("Cannot read metadata of {}: {} (skipping)", path.display(), e),
			}
		}
	}

	segments.sort_by(|a, b| a.key.cmp(&b.key));
	Ok(segments)
}

/// Threshold-plus-stability completeness heuristic
#[derive(Debug, Clone)]
pub struct CompletenessDetector {
	modification_threshold: Duration,
	settling_delay: Duration,
}

impl CompletenessDetector {
	pub fn new(modification_threshold: Duration, settling_delay: Duration) -> Self {
		CompletenessDetector { modification_threshold, settling_delay }
	}

	/// Classify a single file
	pub async fn check(&self, path: &Path) -> Completeness {
		let meta = match afs::metadata(path).await {
			Ok(meta) => meta,
			Err(e) => {
				warn!("Cannot read {}: {} (unreadable)", path.display(), e);
				return Completeness::Unreadable;
			}
		};

		let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
		let age = SystemTime::now().duration_since(mtime).unwrap_or(Duration::ZERO);
		if age <= self.modification_threshold {
			info!(
				"Skipping {}: modified {}s ago, threshold {}s",
				path.display(),
				age.as_secs(),
				self.modification_threshold.as_secs()
			);
			return Completeness::Incomplete;
		}

		tokio::time::sleep(self.settling_delay).await;
		self.resample(path, meta.len()).await
	}

	/// Classify a scanned batch, sharing one settling delay across all files
	///
	/// The scan supplies the first size sample; files old enough are sampled
	/// again after the delay. Equivalent to calling [`check`](Self::check) on
	/// each file, without paying the delay once per file.
	pub async fn classify(&self, segments: Vec<Segment>) -> Vec<(Segment, Completeness)> {
		let now = SystemTime::now();
		let mut results = Vec::with_capacity(segments.len());
		let mut settling = Vec::new();

		for segment in segments {
			let age = segment.age(now);
			if age <= self.modification_threshold {
				info!(
					"Skipping {}: modified {}s ago, threshold {}s",
					segment.key,
					age.as_secs(),
					self.modification_threshold.as_secs()
				);
				results.push((segment, Completeness::Incomplete));
			} else {
				settling.push(segment);
			}
		}

		if settling.is_empty() {
			return results;
		}

		debug!("Waiting {:?} for {} size samples to settle", self.settling_delay, settling.len());
		tokio::time::sleep(self.settling_delay).await;

		for segment in settling {
			let verdict = self.resample(&segment.path, segment.size).await;
			results.push((segment, verdict));
		}
		results
	}

	async fn resample(&self, path: &Path, first_size: u64) -> Completeness {
		match afs::metadata(path).await {
			Ok(meta) if meta.len() == first_size => Completeness::Complete,
			Ok(meta) => {
				info!(
					"Skipping {}: size changed from {} to {} during settling",
					path.display(),
					first_size,
					meta.len()
				);
				Completeness::Incomplete
			}
			Err(e) => {
				warn!("Cannot re-read {}: {} (unreadable)", path.display(), e);
				Completeness::Unreadable
			}
		}
	}
}


// vim: ts=4
