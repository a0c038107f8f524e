//! In-process transfer primitive
//!
//! Each file is copied to `<dest>.segrelay-tmp`, stamped with the source
//! mtime, synced, then renamed into place, so a reader never sees a partial
//! segment under its final name. Destination files with equal size and mtime
//! (whole seconds) are left alone.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs as afs;

use super::{TransferOutput, TransferPrimitive, TEMP_SUFFIX};
use crate::error::{RelayError, TransferError};
use crate::logging::*;
use crate::validation::validate_segment_key;

#[derive(Debug, Default)]
pub struct BuiltinPrimitive;

enum CopyOutcome {
	Copied(u64),
	Unchanged,
}

impl BuiltinPrimitive {
	pub fn new() -> Self {
		BuiltinPrimitive
	}

	async fn copy_one(&self, source: &Path, destination: &Path) -> std::io::Result<CopyOutcome> {
		let src_meta = afs::metadata(source).await?;
		let src_mtime = src_meta.modified()?;

		if let Ok(dst_meta) = afs::metadata(destination).await {
			let same_size = dst_meta.len() == src_meta.len();
			let same_mtime =
				dst_meta.modified().map(|m| whole_secs(m) == whole_secs(src_mtime)).unwrap_or(false);
			if same_size && same_mtime {
				return Ok(CopyOutcome::Unchanged);
			}
		}

		if let Some(parent) = destination.parent() {
			afs::create_dir_all(parent).await?;
		}

		let tmp = temp_path(destination);
		let copied = match self.copy_to_temp(source, &tmp, src_mtime).await {
			Ok(copied) => copied,
			Err(e) => {
				let _ = afs::remove_file(&tmp).await;
				return Err(e);
			}
		};
		afs::rename(&tmp, destination).await?;
		Ok(CopyOutcome::Copied(copied))
	}

	async fn copy_to_temp(&self, source: &Path, tmp: &Path, mtime: SystemTime) -> std::io::Result<u64> {
		let copied = afs::copy(source, tmp).await?;
		// the copy carries the source mode bits, which may be read-only
		let file = afs::File::open(tmp).await?;
		let file = file.into_std().await;
		tokio::task::spawn_blocking(move || {
			file.set_modified(mtime)?;
			file.sync_all()
		})
		.await
		.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
		Ok(copied)
	}
}

fn whole_secs(t: SystemTime) -> u64 {
	t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn temp_path(destination: &Path) -> PathBuf {
	let mut name = destination.as_os_str().to_os_string();
	name.push(TEMP_SUFFIX);
	PathBuf::from(name)
}

#[async_trait]
impl TransferPrimitive for BuiltinPrimitive {
	fn name(&self) -> &str {
		"builtin"
	}

	async fn ensure_available(&self) -> Result<(), RelayError> {
		Ok(())
	}

	async fn transfer(
		&self,
		source_root: &Path,
		destination_root: &Path,
		manifest: &[String],
	) -> Result<TransferOutput, TransferError> {
		let mut stdout = String::new();
		let mut stderr = String::new();
		let mut failed = 0usize;

		for key in manifest {
			if let Err(e) = validate_segment_key(key) {
				failed += 1;
				stderr.push_str(&format!("{}: {}\n", key, e));
				continue;
			}

			let source = source_root.join(key);
			let destination = destination_root.join(key);
			match self.copy_one(&source, &destination).await {
				Ok(CopyOutcome::Copied(bytes)) => {
					debug!("Copied {} ({} bytes)", key, bytes);
					stdout.push_str(&format!("copied {} ({} bytes)\n", key, bytes));
				}
				Ok(CopyOutcome::Unchanged) => {
					debug!("Skipped {}: destination already up to date", key);
					stdout.push_str(&format!("unchanged {}\n", key));
				}
				Err(e) => {
					failed += 1;
					stderr.push_str(&format!("{}: {}\n", key, e));
				}
			}
		}

		Ok(TransferOutput {
			success: failed == 0,
			code: Some(if failed == 0 { 0 } else { 23 }),
			stdout,
			stderr,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use filetime::FileTime;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_copies_nested_and_preserves_mtime() {
		let src = TempDir::new().unwrap();
		let dst = TempDir::new().unwrap();
		std::fs::create_dir_all(src.path().join("day1")).unwrap();
		let file = src.path().join("day1/seg.wav");
		std::fs::write(&file, b"RIFF....WAVE").unwrap();
		filetime::set_file_mtime(&file, FileTime::from_unix_time(1_735_689_600, 0)).unwrap();

		let output = BuiltinPrimitive::new()
			.transfer(src.path(), dst.path(), &["day1/seg.wav".to_string()])
			.await
			.unwrap();

		assert!(output.success);
		let copied = dst.path().join("day1/seg.wav");
		assert_eq!(std::fs::read(&copied).unwrap(), b"RIFF....WAVE");
		let meta = std::fs::metadata(&copied).unwrap();
		assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 1_735_689_600);
		assert!(!dst.path().join("day1/seg.wav.segrelay-tmp").exists());
	}

	#[tokio::test]
	async fn test_second_run_is_unchanged() {
		let src = TempDir::new().unwrap();
		let dst = TempDir::new().unwrap();
		std::fs::write(src.path().join("seg.wav"), b"data").unwrap();

		let primitive = BuiltinPrimitive::new();
		let manifest = vec!["seg.wav".to_string()];
		primitive.transfer(src.path(), dst.path(), &manifest).await.unwrap();
		let output = primitive.transfer(src.path(), dst.path(), &manifest).await.unwrap();

		assert!(output.success);
		assert!(output.stdout.contains("unchanged seg.wav"));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_read_only_source_is_copied() {
		use std::os::unix::fs::PermissionsExt;

		let src = TempDir::new().unwrap();
		let dst = TempDir::new().unwrap();
		let file = src.path().join("seg.wav");
		std::fs::write(&file, b"sealed").unwrap();
		filetime::set_file_mtime(&file, FileTime::from_unix_time(1_735_689_600, 0)).unwrap();
		std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o444)).unwrap();

		let output =
			BuiltinPrimitive::new().transfer(src.path(), dst.path(), &["seg.wav".to_string()]).await.unwrap();

		assert!(output.success, "stderr: {}", output.stderr);
		let copied = dst.path().join("seg.wav");
		assert_eq!(std::fs::read(&copied).unwrap(), b"sealed");
		let meta = std::fs::metadata(&copied).unwrap();
		assert_eq!(meta.permissions().mode() & 0o777, 0o444);
		assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 1_735_689_600);
	}

	#[tokio::test]
	async fn test_missing_source_fails_batch_but_copies_rest() {
		let src = TempDir::new().unwrap();
		let dst = TempDir::new().unwrap();
		std::fs::write(src.path().join("ok.wav"), b"data").unwrap();

		let output = BuiltinPrimitive::new()
			.transfer(src.path(), dst.path(), &["ok.wav".to_string(), "gone.wav".to_string()])
			.await
			.unwrap();

		assert!(!output.success);
		assert!(output.stderr.contains("gone.wav"));
		assert!(dst.path().join("ok.wav").exists());
	}
}

// vim: ts=4
