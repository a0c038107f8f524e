//! rsync-backed transfer primitive
//!
//! The manifest is streamed to `rsync --files-from=-`, which implies
//! `--relative`, so directory structure under the source root is recreated at
//! the destination. `-a` preserves mtimes, which makes rsync's default
//! size+mtime quick check skip files an earlier attempt already delivered.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{TransferOutput, TransferPrimitive};
use crate::error::{RelayError, TransferError};
use crate::logging::*;

pub struct RsyncPrimitive {
	program: String,
	checksum: bool,
}

impl RsyncPrimitive {
	pub fn new(program: String, checksum: bool) -> Self {
		RsyncPrimitive { program, checksum }
	}

	/// Arguments for one invocation (manifest comes on stdin)
	pub fn args(&self, source_root: &Path, destination_root: &Path) -> Vec<String> {
		let mut args = vec!["-a".to_string()];
		if self.checksum {
			args.push("--checksum".to_string());
		}
		args.push("--files-from=-".to_string());
		args.push(format!("{}/", source_root.display()));
		args.push(format!("{}/", destination_root.display()));
		args
	}
}

#[async_trait]
impl TransferPrimitive for RsyncPrimitive {
	fn name(&self) -> &str {
		"rsync"
	}

	async fn ensure_available(&self) -> Result<(), RelayError> {
		let output = Command::new(&self.program)
			.arg("--version")
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|e| RelayError::ToolUnavailable {
				tool: self.program.clone(),
				message: e.to_string(),
			})?;

		if !output.status.success() {
			return Err(RelayError::ToolUnavailable {
				tool: self.program.clone(),
				message: format!("'--version' exited with {}", output.status),
			});
		}

		let version = String::from_utf8_lossy(&output.stdout);
		debug!("Using {}", version.lines().next().unwrap_or("rsync"));
		Ok(())
	}

	async fn transfer(
		&self,
		source_root: &Path,
		destination_root: &Path,
		manifest: &[String],
	) -> Result<TransferOutput, TransferError> {
		let args = self.args(source_root, destination_root);
		info!("Running rsync command: {} {}", self.program, args.join(" "));

		let mut child = Command::new(&self.program)
			.args(&args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| TransferError::SpawnFailed { cmd: self.program.clone(), source: e })?;

		let mut stdin = child.stdin.take().ok_or_else(|| TransferError::ManifestFailed {
			source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "rsync stdin unavailable"),
		})?;

		let mut list = String::new();
		for key in manifest {
			list.push_str(key);
			list.push('\n');
		}

		// Feed the manifest while rsync runs so a full stdout pipe cannot stall it
		let feed = async move {
			let result = stdin.write_all(list.as_bytes()).await;
			drop(stdin);
			result
		};
		let (fed, output) = tokio::join!(feed, child.wait_with_output());

		let output =
			output.map_err(|e| TransferError::SpawnFailed { cmd: self.program.clone(), source: e })?;
		fed.map_err(|e| TransferError::ManifestFailed { source: e })?;

		Ok(TransferOutput {
			success: output.status.success(),
			code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}
}


// vim: ts=4
