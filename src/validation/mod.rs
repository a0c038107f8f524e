//! Checks applied before anything is trusted
//!
//! Configuration is checked once at startup: roots must differ, thresholds
//! and budgets must be usable, segment patterns must compile. Segment keys
//! are checked everywhere they cross a boundary: when a file is scanned, when
//! a ledger line is replayed or appended, and when a peer asks for a digest.
//! A key that fails is skipped where it was found, never repaired.

use std::error::Error;
use std::fmt;

pub mod config;
pub mod path;

pub use config::*;
pub use path::*;

/// A rejected setting or segment key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// Invalid configuration
	ConfigError(String),
	/// Invalid path
	PathError(String),
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::ConfigError(msg) => write!(f, "Config validation error: {}", msg),
			ValidationError::PathError(msg) => write!(f, "Path validation error: {}", msg),
		}
	}
}

impl Error for ValidationError {}

/// Implemented by settings that are checked as a whole
pub trait Validator {
	fn validate(&self) -> Result<(), ValidationError>;
}


// vim: ts=4
