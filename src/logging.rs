//! Logging prelude module for convenient access to tracing macros.
//!
//! # Usage
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Transferred {} segments", count);
//! warn!("Destination usage unavailable");
//! error!("Verification FAILED for {}", key);
//! ```

pub use tracing::{debug, error, info, warn};

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

/// Initialize the tracing subscriber with environment filter support.
///
/// `RUST_LOG` wins over `default_level`:
///
/// ```bash
/// RUST_LOG=debug segrelay run
/// RUST_LOG=segrelay::transfer=trace segrelay once
/// ```
///
/// With a `log_file`, lines are appended to it without ANSI colors so the file
/// stays readable when an operator reconstructs a node's history.
pub fn init_tracing(default_level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

	match log_file {
		Some(path) => {
			let file = OpenOptions::new().create(true).append(true).open(path)?;
			tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_ansi(false)
				.with_writer(Mutex::new(file))
				.init();
		}
		None => {
			tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
		}
	}
	Ok(())
}

// vim: ts=4
