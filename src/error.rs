//! Error types for segrelay operations

use std::error::Error;
use std::fmt;
use std::io;
use std::time::Duration;

use crate::validation::ValidationError;

/// Main error type for pipeline operations
#[derive(Debug)]
pub enum RelayError {
	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Required external tool is missing or unusable
	ToolUnavailable { tool: String, message: String },

	/// Another loop already owns this node's state directory
	LockFailed { message: String },

	/// Ledger error (nested)
	Ledger(LedgerError),

	/// Transfer error (nested)
	Transfer(TransferError),

	/// Precondition gate error (nested)
	Gate(GateError),

	/// Digest exchange error (nested)
	Exchange(ExchangeError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for RelayError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RelayError::Io(e) => write!(f, "I/O error: {}", e),
			RelayError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			RelayError::ToolUnavailable { tool, message } => {
				write!(f, "Required tool '{}' unavailable: {}", tool, message)
			}
			RelayError::LockFailed { message } => {
				write!(f, "Lock acquisition failed: {}", message)
			}
			RelayError::Ledger(e) => write!(f, "Ledger error: {}", e),
			RelayError::Transfer(e) => write!(f, "Transfer error: {}", e),
			RelayError::Gate(e) => write!(f, "Precondition failed: {}", e),
			RelayError::Exchange(e) => write!(f, "Digest exchange error: {}", e),
			RelayError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for RelayError {}

impl From<io::Error> for RelayError {
	fn from(e: io::Error) -> Self {
		RelayError::Io(e)
	}
}

impl From<String> for RelayError {
	fn from(e: String) -> Self {
		RelayError::Other { message: e }
	}
}

impl From<LedgerError> for RelayError {
	fn from(e: LedgerError) -> Self {
		RelayError::Ledger(e)
	}
}

impl From<TransferError> for RelayError {
	fn from(e: TransferError) -> Self {
		RelayError::Transfer(e)
	}
}

impl From<GateError> for RelayError {
	fn from(e: GateError) -> Self {
		RelayError::Gate(e)
	}
}

impl From<ExchangeError> for RelayError {
	fn from(e: ExchangeError) -> Self {
		RelayError::Exchange(e)
	}
}

impl From<ValidationError> for RelayError {
	fn from(e: ValidationError) -> Self {
		RelayError::InvalidConfig { message: e.to_string() }
	}
}

/// Ledger persistence errors
#[derive(Debug)]
pub enum LedgerError {
	/// Failed to read the ledger file
	LoadFailed { path: String, source: io::Error },

	/// Failed to append to the ledger file
	AppendFailed { path: String, source: io::Error },

	/// Record cannot be represented as a single ledger line
	InvalidRecord { message: String },
}

impl fmt::Display for LedgerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LedgerError::LoadFailed { path, source } => {
				write!(f, "Failed to load ledger {}: {}", path, source)
			}
			LedgerError::AppendFailed { path, source } => {
				write!(f, "Failed to append to ledger {}: {}", path, source)
			}
			LedgerError::InvalidRecord { message } => write!(f, "Invalid record: {}", message),
		}
	}
}

impl Error for LedgerError {}

/// Transfer engine errors
#[derive(Debug)]
pub enum TransferError {
	/// Transfer tool could not be spawned
	SpawnFailed { cmd: String, source: io::Error },

	/// Transfer tool ran but reported failure
	ToolFailed { code: Option<i32>, diagnostics: String },

	/// Destination root cannot be created or written
	DestinationUnwritable { path: String, source: io::Error },

	/// A single file in the batch failed to copy
	CopyFailed { path: String, source: io::Error },

	/// Manifest file could not be written
	ManifestFailed { source: io::Error },
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			TransferError::ToolFailed { code, diagnostics } => match code {
				Some(code) => write!(f, "Transfer tool exited with code {}: {}", code, diagnostics),
				None => write!(f, "Transfer tool terminated by signal: {}", diagnostics),
			},
			TransferError::DestinationUnwritable { path, source } => {
				write!(f, "Destination {} not writable: {}", path, source)
			}
			TransferError::CopyFailed { path, source } => {
				write!(f, "Failed to copy {}: {}", path, source)
			}
			TransferError::ManifestFailed { source } => {
				write!(f, "Failed to write transfer manifest: {}", source)
			}
		}
	}
}

impl Error for TransferError {}

/// Precondition gate errors
#[derive(Debug)]
pub enum GateError {
	/// Root is not backed by a mounted filesystem
	NotMounted { label: String, path: String },

	/// Root could not be resolved at all
	Unresolvable { label: String, path: String, source: io::Error },
}

impl fmt::Display for GateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			GateError::NotMounted { label, path } => {
				write!(f, "{} is NOT mounted: {}", label, path)
			}
			GateError::Unresolvable { label, path, source } => {
				write!(f, "{} cannot be resolved ({}): {}", label, path, source)
			}
		}
	}
}

impl Error for GateError {}

/// Digest exchange errors
#[derive(Debug)]
pub enum ExchangeError {
	/// Peer process could not be started
	SpawnFailed { cmd: String, source: io::Error },

	/// Peer stdio unavailable
	StdioUnavailable { what: String },

	/// I/O failure talking to the peer
	Io(io::Error),

	/// Peer answered with something we cannot parse
	ProtocolViolation { message: String },

	/// Peer answered for a different path than requested
	PathMismatch { requested: String, answered: String },

	/// Peer could not compute the digest
	PeerFailed { path: String, message: String },

	/// Peer closed the channel
	Disconnected,

	/// Peer did not answer in time
	Timeout { after: Duration },
}

impl fmt::Display for ExchangeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExchangeError::SpawnFailed { cmd, source } => {
				write!(f, "Failed to spawn '{}': {}", cmd, source)
			}
			ExchangeError::StdioUnavailable { what } => write!(f, "Stdio unavailable: {}", what),
			ExchangeError::Io(e) => write!(f, "I/O error: {}", e),
			ExchangeError::ProtocolViolation { message } => {
				write!(f, "Protocol violation: {}", message)
			}
			ExchangeError::PathMismatch { requested, answered } => {
				write!(f, "Requested digest for {} but peer answered for {}", requested, answered)
			}
			ExchangeError::PeerFailed { path, message } => {
				write!(f, "Peer failed to digest {}: {}", path, message)
			}
			ExchangeError::Disconnected => write!(f, "Peer disconnected"),
			ExchangeError::Timeout { after } => {
				write!(f, "No answer from peer within {}s", after.as_secs_f64())
			}
		}
	}
}

impl Error for ExchangeError {}

impl From<io::Error> for ExchangeError {
	fn from(e: io::Error) -> Self {
		ExchangeError::Io(e)
	}
}

impl From<serde_json::Error> for ExchangeError {
	fn from(e: serde_json::Error) -> Self {
		ExchangeError::ProtocolViolation { message: e.to_string() }
	}
}

impl From<json5::Error> for ExchangeError {
	fn from(e: json5::Error) -> Self {
		ExchangeError::ProtocolViolation { message: e.to_string() }
	}
}


// vim: ts=4
