//! Precondition Gate
//!
//! A cycle may only transfer or delete when every gated root lives on its own
//! mounted filesystem. An unmounted USB disk leaves an empty directory behind
//! on the root filesystem; writing segments there (or deleting sources after
//! "verifying" against it) is exactly what the gate prevents.
//!
//! A mount boundary is a directory whose device differs from its parent's,
//! or one listed as a mount point by the OS. The filesystem root never
//! counts as a boundary.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{Config, Role};
use crate::error::GateError;
use crate::logging::*;

/// Free space of the filesystem holding a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUsage {
	pub mount_point: PathBuf,
	pub total: u64,
	pub available: u64,
}

/// Outcome of the advisory storage health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
	Passed,
	Failed,
	Unavailable,
}

/// What a passed gate observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
	/// Labels of roots confirmed on a mount
	pub mounted: Vec<String>,
	pub destination_usage: Option<DiskUsage>,
	pub health: Option<HealthStatus>,
}

/// Mount points reported by the OS
fn mount_points() -> Vec<PathBuf> {
	let disks = sysinfo::Disks::new_with_refreshed_list();
	disks.list().iter().map(|disk| disk.mount_point().to_path_buf()).collect()
}

/// Closest ancestor of `path` (or `path` itself) that exists, canonicalized
fn resolve_existing(path: &Path) -> io::Result<PathBuf> {
	let mut current = path;
	loop {
		match current.canonicalize() {
			Ok(resolved) => return Ok(resolved),
			Err(e) if e.kind() == io::ErrorKind::NotFound => match current.parent() {
				Some(parent) if !parent.as_os_str().is_empty() => current = parent,
				_ => return Err(e),
			},
			Err(e) => return Err(e),
		}
	}
}

fn is_mount_boundary(dir: &Path, mount_points: &[PathBuf]) -> io::Result<bool> {
	if mount_points.iter().any(|mp| mp == dir) {
		return Ok(true);
	}
	let parent = match dir.parent() {
		Some(parent) => parent,
		None => return Ok(false),
	};
	Ok(std::fs::metadata(dir)?.dev() != std::fs::metadata(parent)?.dev())
}

/// Walk upward from `path` looking for a mount boundary below `/`
pub fn has_mount_boundary(path: &Path, mount_points: &[PathBuf]) -> io::Result<bool> {
	let resolved = resolve_existing(path)?;
	let mut current: &Path = &resolved;
	while current.parent().is_some() {
		if is_mount_boundary(current, mount_points)? {
			return Ok(true);
		}
		current = match current.parent() {
			Some(parent) => parent,
			None => break,
		};
	}
	Ok(false)
}

/// Whether `path` is backed by a filesystem mounted somewhere below `/`
pub fn is_path_on_mounted_fs(path: &Path) -> io::Result<bool> {
	has_mount_boundary(path, &mount_points())
}

/// Space on the filesystem whose mount point is the longest prefix of `path`
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
	let resolved = resolve_existing(path).ok()?;
	let disks = sysinfo::Disks::new_with_refreshed_list();
	disks
		.list()
		.iter()
		.filter(|disk| resolved.starts_with(disk.mount_point()))
		.max_by_key(|disk| disk.mount_point().as_os_str().len())
		.map(|disk| DiskUsage {
			mount_point: disk.mount_point().to_path_buf(),
			total: disk.total_space(),
			available: disk.available_space(),
		})
}

pub struct PreconditionGate {
	roots: Vec<(String, PathBuf)>,
	destination: PathBuf,
	health_device: Option<PathBuf>,
	smartctl_path: String,
}

impl PreconditionGate {
	pub fn new(config: &Config) -> Self {
		let mut roots = Vec::new();
		if config.gates_source() {
			roots.push(("Source".to_string(), config.source_dir.clone()));
		}
		if config.gate.check_destination {
			roots.push(("Destination".to_string(), config.destination_dir.clone()));
		}
		let health_device = match config.role {
			Role::Producer => config.gate.health_device.clone(),
			Role::Relay => None,
		};
		PreconditionGate {
			roots,
			destination: config.destination_dir.clone(),
			health_device,
			smartctl_path: config.gate.smartctl_path.clone(),
		}
	}

	/// Refuse the cycle if any gated root is not on a mount
	pub async fn check(&self) -> Result<GateReport, GateError> {
		let mut report = GateReport::default();

		for (label, root) in &self.roots {
			let path = root.clone();
			let mounted = tokio::task::spawn_blocking(move || is_path_on_mounted_fs(&path))
				.await
				.map_err(|e| io::Error::new(io::ErrorKind::Other, e))
				.and_then(|result| result)
				.map_err(|e| GateError::Unresolvable {
					label: label.clone(),
					path: root.display().to_string(),
					source: e,
				})?;

			if !mounted {
				return Err(GateError::NotMounted {
					label: label.clone(),
					path: root.display().to_string(),
				});
			}
			debug!("{} {} is on a mounted filesystem", label, root.display());
			report.mounted.push(label.clone());
		}

		let destination = self.destination.clone();
		report.destination_usage =
			tokio::task::spawn_blocking(move || disk_usage(&destination)).await.ok().flatten();
		match &report.destination_usage {
			Some(usage) => info!(
				"Destination {} on {}: {} MiB available of {} MiB",
				self.destination.display(),
				usage.mount_point.display(),
				usage.available / (1024 * 1024),
				usage.total / (1024 * 1024)
			),
			None => warn!("Cannot determine disk usage of {}", self.destination.display()),
		}

		if let Some(device) = &self.health_device {
			report.health = Some(self.check_health(device).await);
		}

		Ok(report)
	}

	/// `smartctl -H <device>`; never fails the gate
	async fn check_health(&self, device: &Path) -> HealthStatus {
		info!("Running SMART health check on {}", device.display());
		let output = Command::new(&self.smartctl_path)
			.arg("-H")
			.arg(device)
			.stdin(Stdio::null())
			.output()
			.await;

		match output {
			Ok(output) if output.status.success() => {
				info!("SMART health check output:\n{}", String::from_utf8_lossy(&output.stdout).trim());
				HealthStatus::Passed
			}
			Ok(output) => {
				warn!(
					"SMART check returned {}.\nstdout: {}\nstderr: {}",
					output.status,
					String::from_utf8_lossy(&output.stdout).trim(),
					String::from_utf8_lossy(&output.stderr).trim()
				);
				HealthStatus::Failed
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!("{} not installed or not found; skipping SMART check", self.smartctl_path);
				HealthStatus::Unavailable
			}
			Err(e) => {
				warn!("Error running {}: {}", self.smartctl_path, e);
				HealthStatus::Unavailable
			}
		}
	}
}


// vim: ts=4
