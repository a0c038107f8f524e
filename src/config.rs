//! Configuration for a segrelay node
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (TOML, or JSON when the file ends in `.json`)
//! 3. CLI flags (highest priority, applied by the binary)
//!
//! The pipeline takes a clone of the resulting struct at construction, so a
//! running loop always works from one static snapshot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::RelayError;
use crate::state::StateDir;
use crate::validation::{self, ValidationError, Validator};

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Configuration for one node in the producer → relay → archive chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// NODE IDENTITY
	// ========================================================================
	/// What this node does in the chain
	pub role: Role,

	/// Node name used in log lines
	pub node: String,

	// ========================================================================
	// ROOTS & STATE
	// ========================================================================
	/// Segment Store read by this node
	pub source_dir: PathBuf,

	/// Where complete segments are copied to
	pub destination_dir: PathBuf,

	/// Directory holding the ledgers and the lock file
	pub state_dir: PathBuf,

	/// Glob patterns a file name must match to be treated as a segment
	pub segment_patterns: Vec<String>,

	// ========================================================================
	// COMPLETENESS
	// ========================================================================
	/// A segment must be untouched for longer than this before it is considered
	pub modification_threshold_secs: u64,

	/// Delay between the two size samples of the stability check
	pub settling_delay_ms: u64,

	// ========================================================================
	// LOOP
	// ========================================================================
	/// Seconds between pipeline passes
	pub poll_interval_secs: u64,

	/// Plan and log every decision without copying, appending, or deleting
	pub dry_run: bool,

	// ========================================================================
	// SUBSYSTEMS
	// ========================================================================
	pub retention: RetentionBudget,
	pub transfer: TransferConfig,
	pub verify: VerifyConfig,
	pub gate: GateConfig,

	// ========================================================================
	// OUTPUT & LOGGING
	// ========================================================================
	/// Log level used when RUST_LOG is not set
	pub log_level: String,

	/// Append logs to this file instead of stderr
	pub log_file: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			role: Role::Producer,
			node: "recording-node".to_string(),
			source_dir: PathBuf::from("/home/pi/local_recordings"),
			destination_dir: PathBuf::from("/media/recordingpi/Elements/audio"),
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".segrelay"))
				.unwrap_or_else(|| PathBuf::from(".segrelay")),
			segment_patterns: vec!["*.wav".to_string()],

			// One hour segments plus a minute of slack
			modification_threshold_secs: 3660,
			settling_delay_ms: 2000,

			poll_interval_secs: 60,
			dry_run: false,

			retention: RetentionBudget::default(),
			transfer: TransferConfig::default(),
			verify: VerifyConfig::default(),
			gate: GateConfig::default(),

			log_level: "info".to_string(),
			log_file: None,
		}
	}
}

impl Config {
	/// Load a configuration file, falling back to defaults for missing keys
	pub fn load(path: &Path) -> Result<Config, RelayError> {
		let contents = std::fs::read_to_string(path).map_err(|e| RelayError::InvalidConfig {
			message: format!("Cannot read config file {}: {}", path.display(), e),
		})?;

		let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
		if is_json {
			serde_json::from_str(&contents).map_err(|e| RelayError::InvalidConfig {
				message: format!("Failed to parse {}: {}", path.display(), e),
			})
		} else {
			toml::from_str(&contents).map_err(|e| RelayError::InvalidConfig {
				message: format!("Failed to parse {}: {}", path.display(), e),
			})
		}
	}

	pub fn modification_threshold(&self) -> Duration {
		Duration::from_secs(self.modification_threshold_secs)
	}

	pub fn settling_delay(&self) -> Duration {
		Duration::from_millis(self.settling_delay_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	pub fn state(&self) -> StateDir {
		StateDir::new(self.state_dir.clone())
	}

	/// Path of the Sync Ledger
	pub fn sync_ledger_path(&self) -> PathBuf {
		self.state().sync_ledger_path()
	}

	/// Path of the Verification Ledger
	pub fn verification_ledger_path(&self) -> PathBuf {
		self.state().verification_ledger_path()
	}

	/// Only the producing node reclaims space
	pub fn runs_retention(&self) -> bool {
		self.role == Role::Producer
	}

	/// Whether the gate must see the source root on its own mount
	///
	/// A producer records to its root filesystem, a relay reads a mounted
	/// remote store, so the default follows the role.
	pub fn gates_source(&self) -> bool {
		self.gate.check_source.unwrap_or(self.role == Role::Relay)
	}
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		validation::validate_roots(&self.source_dir, &self.destination_dir)?;
		validation::validate_poll_interval_secs(self.poll_interval_secs)?;
		validation::validate_segment_patterns(&self.segment_patterns)?;
		validation::validate_max_attempts(self.transfer.max_attempts)?;
		validation::validate_chunk_size(self.verify.chunk_size)?;
		validation::validate_timeout_secs(self.verify.timeout_secs)?;
		if self.runs_retention() {
			validation::validate_budget(self.retention.max_bytes, self.retention.max_files)?;
		}
		if self.verify.source == DigestSource::Remote {
			if self.verify.remote_host.as_deref().map(str::is_empty).unwrap_or(true) {
				return Err(ValidationError::ConfigError(
					"verify.remoteHost is required when verify.source is remote".to_string(),
				));
			}
			if self.verify.remote_dir.is_none() {
				return Err(ValidationError::ConfigError(
					"verify.remoteDir is required when verify.source is remote".to_string(),
				));
			}
		}
		Ok(())
	}
}

// ============================================================================
// NESTED CONFIGURATION STRUCTS
// ============================================================================

/// Storage ceiling on the producing node's Segment Store
///
/// The store is over budget when any configured ceiling is exceeded. With no
/// ceiling configured, retention never deletes anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetentionBudget {
	/// Total bytes of all files under the store
	pub max_bytes: Option<u64>,

	/// Number of segment files in the store
	pub max_files: Option<usize>,
}

impl RetentionBudget {
	pub fn is_unbounded(&self) -> bool {
		self.max_bytes.is_none() && self.max_files.is_none()
	}

	/// Whether the given usage is above any ceiling
	pub fn exceeded_by(&self, bytes: u64, files: usize) -> bool {
		self.max_bytes.map(|max| bytes > max).unwrap_or(false)
			|| self.max_files.map(|max| files > max).unwrap_or(false)
	}
}

/// Transfer primitive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferConfig {
	/// Which bulk-copy primitive moves batches
	pub primitive: TransferKind,

	/// rsync executable
	pub rsync_path: String,

	/// Pass --checksum to rsync instead of size/mtime change detection
	pub checksum: bool,

	/// Attempts per batch within one cycle
	pub max_attempts: u32,

	/// Delay between attempts in milliseconds
	pub retry_delay_ms: u64,
}

impl Default for TransferConfig {
	fn default() -> Self {
		TransferConfig {
			primitive: TransferKind::Rsync,
			rsync_path: "rsync".to_string(),
			checksum: false,
			max_attempts: 3,
			retry_delay_ms: 2000,
		}
	}
}

/// Integrity verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifyConfig {
	/// Where the source digest comes from
	pub source: DigestSource,

	/// ssh destination of the source node (remote source only)
	pub remote_host: Option<String>,

	/// segrelay executable on the source node
	pub remote_command: String,

	/// Segment Store directory on the source node
	pub remote_dir: Option<PathBuf>,

	/// Read size of the streaming digest
	pub chunk_size: usize,

	/// Seconds a remote digest request (connection included) may take
	pub timeout_secs: u64,
}

impl Default for VerifyConfig {
	fn default() -> Self {
		VerifyConfig {
			source: DigestSource::Local,
			remote_host: None,
			remote_command: "segrelay".to_string(),
			remote_dir: None,
			chunk_size: 65536,
			timeout_secs: 300,
		}
	}
}

impl VerifyConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

/// Precondition gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateConfig {
	/// Require the source root on its own mount (default depends on role)
	pub check_source: Option<bool>,

	/// Require the destination root on its own mount
	pub check_destination: bool,

	/// Block device queried with smartctl before each cycle (producer only)
	pub health_device: Option<PathBuf>,

	/// smartctl executable
	pub smartctl_path: String,
}

impl Default for GateConfig {
	fn default() -> Self {
		GateConfig {
			check_source: None,
			check_destination: true,
			health_device: None,
			smartctl_path: "smartctl".to_string(),
		}
	}
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Node role in the replication chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
	/// Recording node: owns the segments and reclaims them once verified
	#[default]
	Producer,
	/// Intermediate node: forwards segments, never deletes
	Relay,
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"producer" | "recordingpi" => Ok(Role::Producer),
			"relay" | "analyticspi" => Ok(Role::Relay),
			_ => Err(format!("Unknown role: {}. Valid options: producer, relay", s)),
		}
	}
}

impl std::fmt::Display for Role {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Role::Producer => write!(f, "producer"),
			Role::Relay => write!(f, "relay"),
		}
	}
}

/// Bulk-copy primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
	/// External rsync with --files-from
	#[default]
	Rsync,
	/// In-process copy with size/mtime skip
	Builtin,
}

/// Origin of the source-side digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DigestSource {
	/// Source root is locally addressable
	#[default]
	Local,
	/// Ask the source node over `ssh <host> segrelay serve-digest <dir>`
	Remote,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn valid_config() -> Config {
		Config {
			source_dir: PathBuf::from("/rec"),
			destination_dir: PathBuf::from("/media/usb/audio"),
			retention: RetentionBudget { max_bytes: Some(1 << 30), max_files: None },
			..Config::default()
		}
	}

	#[test]
	fn test_config_default() {
		let config = Config::default();
		assert_eq!(config.role, Role::Producer);
		assert_eq!(config.modification_threshold_secs, 3660);
		assert_eq!(config.segment_patterns, vec!["*.wav".to_string()]);
		assert!(!config.dry_run);
		assert_eq!(config.transfer.max_attempts, 3);
	}

	#[test]
	fn test_gates_source_follows_role() {
		let mut config = valid_config();
		assert!(!config.gates_source());
		config.role = Role::Relay;
		assert!(config.gates_source());
		config.gate.check_source = Some(false);
		assert!(!config.gates_source());
	}

	#[test]
	fn test_budget_exceeded() {
		let budget = RetentionBudget { max_bytes: Some(100), max_files: Some(3) };
		assert!(!budget.exceeded_by(100, 3));
		assert!(budget.exceeded_by(101, 1));
		assert!(budget.exceeded_by(10, 4));
		assert!(!RetentionBudget::default().exceeded_by(u64::MAX, usize::MAX));
	}

	#[test]
	fn test_validate_remote_requires_host() {
		let mut config = valid_config();
		config.verify.source = DigestSource::Remote;
		assert!(config.validate().is_err());
		config.verify.remote_host = Some("recordingpi".to_string());
		config.verify.remote_dir = Some(PathBuf::from("/home/pi/local_recordings"));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_toml_round_trip_of_partial_file() {
		let config: Config = toml::from_str(
			r#"
			role = "relay"
			sourceDir = "/mnt/recordingpi"
			destinationDir = "/mnt/nas/audio"
			pollIntervalSecs = 30

			[transfer]
			primitive = "builtin"
			"#,
		)
		.expect("Failed to parse");
		assert_eq!(config.role, Role::Relay);
		assert_eq!(config.poll_interval_secs, 30);
		assert_eq!(config.transfer.primitive, TransferKind::Builtin);
		assert_eq!(config.transfer.rsync_path, "rsync");
		assert_eq!(config.settling_delay_ms, 2000);
	}

	#[test]
	fn test_role_from_str() {
		assert_eq!("producer".parse::<Role>(), Ok(Role::Producer));
		assert_eq!("analyticspi".parse::<Role>(), Ok(Role::Relay));
		assert!("archive".parse::<Role>().is_err());
	}
}

// vim: ts=4
