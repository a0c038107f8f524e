//! # segrelay - verified replication of recorded audio segments
//!
//! A recorder writes hour-long segment files into a local store. segrelay
//! moves finished segments down a chain of nodes (recording node → relay →
//! archive disk), checks every copy against the source by content digest,
//! and only then lets the recording node reclaim space. Progress is kept in
//! two append-only ledgers per node, so a crash or power cut at any point is
//! recovered by simply running the next cycle.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segrelay::config::Config;
//! use segrelay::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("/etc/segrelay.toml".as_ref())?;
//!     let mut pipeline = Pipeline::new(config).await?;
//!     pipeline.ensure_available().await?;
//!     let report = pipeline.run_cycle().await;
//!     println!("Transferred {} segments", report.transferred.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod retention;
pub mod serve;
pub mod shutdown;
pub mod state;
pub mod transfer;
pub mod types;
pub mod validation;
pub mod verify;

// Re-export commonly used types and functions
pub use config::{Config, Role};
pub use error::{ExchangeError, GateError, LedgerError, RelayError, TransferError};
pub use pipeline::Pipeline;
pub use types::{Completeness, CycleOutcome, CycleReport, Segment, SegmentState, Verdict};

// vim: ts=4
