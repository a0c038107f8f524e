//! Transfer Engine
//!
//! Moves one batch of complete, unsynced segments per cycle through a bulk-copy
//! primitive and commits the whole batch to the Sync Ledger only after the
//! primitive confirmed every file. A failed batch leaves the ledger untouched
//! and is retried whole on the next cycle; primitives skip destination files
//! whose size and mtime already match, which keeps those retries idempotent.

mod builtin;
mod rsync;

pub use builtin::BuiltinPrimitive;
pub use rsync::RsyncPrimitive;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs as afs;

use crate::config::{Config, TransferKind};
use crate::error::{RelayError, TransferError};
use crate::ledger::SyncLedger;
use crate::logging::*;

/// Suffix of files being written by the builtin primitive
pub const TEMP_SUFFIX: &str = ".segrelay-tmp";

/// What a primitive reports for one invocation
#[derive(Debug, Clone, Default)]
pub struct TransferOutput {
	/// True only when every file in the manifest is present at the destination
	pub success: bool,
	pub code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl TransferOutput {
	/// Combined diagnostic text for log lines
	pub fn diagnostics(&self) -> String {
		match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
			(true, true) => String::new(),
			(false, true) => self.stdout.trim().to_string(),
			(true, false) => self.stderr.trim().to_string(),
			(false, false) => format!("{}\n{}", self.stdout.trim(), self.stderr.trim()),
		}
	}
}

/// Bulk-copy primitive driven by an explicit manifest of relative paths
#[async_trait]
pub trait TransferPrimitive: Send + Sync {
	/// Name used in log lines
	fn name(&self) -> &str;

	/// Fail at startup if the primitive cannot run at all
	async fn ensure_available(&self) -> Result<(), RelayError>;

	/// Copy `manifest` (keys relative to `source_root`) into `destination_root`
	///
	/// Must preserve relative directory structure and skip destination files
	/// that already match by size and mtime.
	async fn transfer(
		&self,
		source_root: &Path,
		destination_root: &Path,
		manifest: &[String],
	) -> Result<TransferOutput, TransferError>;
}

/// Build the primitive named by the configuration
pub fn primitive_from_config(config: &Config) -> Box<dyn TransferPrimitive> {
	match config.transfer.primitive {
		TransferKind::Rsync => {
			Box::new(RsyncPrimitive::new(config.transfer.rsync_path.clone(), config.transfer.checksum))
		}
		TransferKind::Builtin => Box::new(BuiltinPrimitive::new()),
	}
}

/// Result of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
	/// Nothing to transfer this cycle
	Empty,
	/// Dry-run: the manifest that would have been transferred
	DryRun(Vec<String>),
	/// Copied and appended to the Sync Ledger
	Committed(Vec<String>),
	/// Every attempt failed; nothing appended
	Failed { attempts: u32, error: String },
}

pub struct TransferEngine {
	primitive: Box<dyn TransferPrimitive>,
	source_root: PathBuf,
	destination_root: PathBuf,
	max_attempts: u32,
	retry_delay: Duration,
	dry_run: bool,
}

impl TransferEngine {
	pub fn new(config: &Config, primitive: Box<dyn TransferPrimitive>) -> Self {
		TransferEngine {
			primitive,
			source_root: config.source_dir.clone(),
			destination_root: config.destination_dir.clone(),
			max_attempts: config.transfer.max_attempts.max(1),
			retry_delay: Duration::from_millis(config.transfer.retry_delay_ms),
			dry_run: config.dry_run,
		}
	}

	pub async fn ensure_available(&self) -> Result<(), RelayError> {
		self.primitive.ensure_available().await
	}

	/// Transfer `batch` and commit it to `ledger` on full success
	///
	/// Returns `Err` only when the destination root cannot be prepared (the
	/// cycle should stop) or when the ledger append itself fails after a
	/// successful copy (the batch will be rediscovered next cycle).
	pub async fn transfer_batch(
		&self,
		batch: Vec<String>,
		ledger: &mut SyncLedger,
	) -> Result<BatchResult, RelayError> {
		let batch: Vec<String> = batch.into_iter().filter(|key| !ledger.contains(key)).collect();
		if batch.is_empty() {
			info!("No new complete segments to transfer");
			return Ok(BatchResult::Empty);
		}

		if self.dry_run {
			for key in &batch {
				info!("[DRY-RUN] Would transfer {}", key);
			}
			return Ok(BatchResult::DryRun(batch));
		}

		afs::create_dir_all(&self.destination_root).await.map_err(|e| {
			TransferError::DestinationUnwritable {
				path: self.destination_root.display().to_string(),
				source: e,
			}
		})?;

		info!(
			"Transferring {} segments with {} from {} to {}",
			batch.len(),
			self.primitive.name(),
			self.source_root.display(),
			self.destination_root.display()
		);

		let mut last_error = String::new();
		for attempt in 1..=self.max_attempts {
			match self.primitive.transfer(&self.source_root, &self.destination_root, &batch).await {
				Ok(output) if output.success => {
					let diagnostics = output.diagnostics();
					if !diagnostics.is_empty() {
						debug!("{} output:\n{}", self.primitive.name(), diagnostics);
					}
					ledger.append_keys(&batch).await?;
					for key in &batch {
						info!("Transferred {} (recorded in sync ledger)", key);
					}
					return Ok(BatchResult::Committed(batch));
				}
				Ok(output) => {
					last_error = TransferError::ToolFailed {
						code: output.code,
						diagnostics: output.diagnostics(),
					}
					.to_string();
				}
				Err(e) => {
					last_error = e.to_string();
				}
			}

			warn!(
				"Transfer attempt {}/{} of {} segments failed: {}",
				attempt,
				self.max_attempts,
				batch.len(),
				last_error
			);
			if attempt < self.max_attempts {
				tokio::time::sleep(self.retry_delay).await;
			}
		}

		error!(
			"Transfer of {} segments failed after {} attempts; whole batch retried next cycle",
			batch.len(),
			self.max_attempts
		);
		Ok(BatchResult::Failed { attempts: self.max_attempts, error: last_error })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;
	use tempfile::TempDir;

	/// Fails the first `failures` calls, then succeeds without copying
	struct FlakyPrimitive {
		failures: u32,
		calls: Arc<AtomicU32>,
	}

	#[async_trait]
	impl TransferPrimitive for FlakyPrimitive {
		fn name(&self) -> &str {
			"flaky"
		}

		async fn ensure_available(&self) -> Result<(), RelayError> {
			Ok(())
		}

		async fn transfer(
			&self,
			_source_root: &Path,
			_destination_root: &Path,
			_manifest: &[String],
		) -> Result<TransferOutput, TransferError> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(TransferOutput {
				success: call >= self.failures,
				code: Some(if call >= self.failures { 0 } else { 23 }),
				stdout: String::new(),
				stderr: "some files could not be transferred".to_string(),
			})
		}
	}

	fn engine(dirs: &TempDir, failures: u32, calls: Arc<AtomicU32>) -> TransferEngine {
		let config = Config {
			source_dir: dirs.path().join("src"),
			destination_dir: dirs.path().join("dst"),
			transfer: crate::config::TransferConfig {
				max_attempts: 2,
				retry_delay_ms: 1,
				..Default::default()
			},
			..Config::default()
		};
		TransferEngine::new(&config, Box::new(FlakyPrimitive { failures, calls }))
	}

	#[tokio::test]
	async fn test_retry_within_cycle_then_commit() {
		let dirs = TempDir::new().unwrap();
		let calls = Arc::new(AtomicU32::new(0));
		let mut ledger = SyncLedger::open(&dirs.path().join("synced.log")).await.unwrap();

		let result =
			engine(&dirs, 1, calls.clone()).transfer_batch(vec!["a.wav".to_string()], &mut ledger).await.unwrap();

		assert_eq!(result, BatchResult::Committed(vec!["a.wav".to_string()]));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert!(ledger.contains("a.wav"));
	}

	#[tokio::test]
	async fn test_failed_batch_commits_nothing() {
		let dirs = TempDir::new().unwrap();
		let calls = Arc::new(AtomicU32::new(0));
		let mut ledger = SyncLedger::open(&dirs.path().join("synced.log")).await.unwrap();

		let batch = vec!["a.wav".to_string(), "b.wav".to_string()];
		let result = engine(&dirs, 10, calls.clone()).transfer_batch(batch, &mut ledger).await.unwrap();

		assert!(matches!(result, BatchResult::Failed { attempts: 2, .. }));
		assert!(ledger.is_empty());
		assert!(!dirs.path().join("synced.log").exists());
	}

	#[tokio::test]
	async fn test_already_synced_keys_are_dropped() {
		let dirs = TempDir::new().unwrap();
		let calls = Arc::new(AtomicU32::new(0));
		let mut ledger = SyncLedger::open(&dirs.path().join("synced.log")).await.unwrap();
		ledger.append_keys(&["a.wav".to_string()]).await.unwrap();

		let result =
			engine(&dirs, 0, calls.clone()).transfer_batch(vec!["a.wav".to_string()], &mut ledger).await.unwrap();

		assert_eq!(result, BatchResult::Empty);
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}
}

// vim: ts=4
