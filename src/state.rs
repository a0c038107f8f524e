//! Node state directory and single-writer lock
//!
//! Both ledgers live in the state directory, and only one loop per node may
//! mutate them. The lock file holds the owner's PID; a lock whose PID is no
//! longer running is treated as stale and taken over.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs as afs;
use tokio::io::AsyncWriteExt;

use crate::error::RelayError;
use crate::ledger::{SyncLedger, VerificationLedger};
use crate::logging::*;

const LOCK_FILE: &str = ".segrelay.lock";

/// Per-node state directory
#[derive(Debug, Clone)]
pub struct StateDir {
	root: PathBuf,
}

impl StateDir {
	pub fn new(root: PathBuf) -> Self {
		StateDir { root }
	}

	pub fn path(&self) -> &Path {
		&self.root
	}

	pub fn sync_ledger_path(&self) -> PathBuf {
		self.root.join("synced.log")
	}

	pub fn verification_ledger_path(&self) -> PathBuf {
		self.root.join("verified.log")
	}

	pub fn lock_path(&self) -> PathBuf {
		self.root.join(LOCK_FILE)
	}

	/// Create the directory if needed
	pub async fn ensure(&self) -> Result<(), RelayError> {
		afs::create_dir_all(&self.root).await.map_err(|e| RelayError::InvalidConfig {
			message: format!("Cannot create state directory {}: {}", self.root.display(), e),
		})
	}

	/// Load both ledgers
	pub async fn open_ledgers(&self) -> Result<(SyncLedger, VerificationLedger), RelayError> {
		let synced = SyncLedger::open(&self.sync_ledger_path()).await?;
		let verification = VerificationLedger::open(&self.verification_ledger_path()).await?;
		Ok((synced, verification))
	}

	/// Acquire the single-writer lock
	pub async fn lock(&self) -> Result<StateLock, RelayError> {
		self.ensure().await?;
		let lock_path = self.lock_path();

		for _ in 0..2 {
			match create_lock_file(&lock_path).await {
				Ok(()) => return Ok(StateLock { path: lock_path }),
				Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
					let owner = afs::read_to_string(&lock_path).await.unwrap_or_default();
					let owner = owner.trim();
					if pid_alive(owner) {
						return Err(RelayError::LockFailed {
							message: format!(
								"Another segrelay (PID {}) owns {}. If stale, delete: {}",
								owner,
								self.root.display(),
								lock_path.display()
							),
						});
					}
					warn!("Removing stale lock {} (PID '{}' not running)", lock_path.display(), owner);
					if let Err(e) = afs::remove_file(&lock_path).await {
						if e.kind() != io::ErrorKind::NotFound {
							return Err(RelayError::LockFailed {
								message: format!("Failed to remove stale lock: {}", e),
							});
						}
					}
				}
				Err(e) => {
					return Err(RelayError::LockFailed {
						message: format!("Failed to create lock file: {}", e),
					});
				}
			}
		}

		Err(RelayError::LockFailed {
			message: format!("Lock file {} keeps reappearing", lock_path.display()),
		})
	}
}

async fn create_lock_file(path: &Path) -> io::Result<()> {
	let mut file = afs::OpenOptions::new().write(true).create_new(true).open(path).await?;
	file.write_all(std::process::id().to_string().as_bytes()).await?;
	file.sync_data().await
}

fn pid_alive(pid: &str) -> bool {
	match pid.parse::<u32>() {
		Ok(pid) => Path::new("/proc").join(pid.to_string()).exists(),
		Err(_) => false,
	}
}

/// RAII lock guard for exclusive ledger access
#[derive(Debug)]
pub struct StateLock {
	path: PathBuf,
}

impl StateLock {
	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for StateLock {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}


// vim: ts=4
