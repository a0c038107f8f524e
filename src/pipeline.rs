//! Pipeline orchestration
//!
//! One cycle runs the stages in order:
//!
//! ```text
//! gate -> scan + completeness -> transfer -> verify -> retention (producer)
//! ```
//!
//! A gate refusal skips the whole cycle; a stage error aborts the remaining
//! stages. Neither stops the loop. Ledgers are re-read at the start of every
//! cycle so operator edits take effect without a restart.

use std::time::SystemTime;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::detector::{scan_segments, CompletenessDetector, SegmentMatcher};
use crate::error::RelayError;
use crate::gate::PreconditionGate;
use crate::ledger::{SyncLedger, VerificationLedger};
use crate::logging::*;
use crate::retention::RetentionManager;
use crate::shutdown::ShutdownSignal;
use crate::state::StateDir;
use crate::transfer::{primitive_from_config, BatchResult, TransferEngine, TransferPrimitive};
use crate::types::{Completeness, CycleOutcome, CycleReport, Segment, SegmentState, Verdict};
use crate::validation::Validator;
use crate::verify::{exchange_from_config, DigestExchange, IntegrityVerifier};

pub struct Pipeline {
	config: Config,
	state: StateDir,
	matcher: SegmentMatcher,
	detector: CompletenessDetector,
	gate: PreconditionGate,
	transfer: TransferEngine,
	verifier: IntegrityVerifier,
	retention: Option<RetentionManager>,
	synced: SyncLedger,
	verification: VerificationLedger,
}

impl Pipeline {
	/// Build a pipeline with the primitive and exchange named by `config`
	pub async fn new(config: Config) -> Result<Self, RelayError> {
		let primitive = primitive_from_config(&config);
		let exchange = exchange_from_config(&config);
		Self::with_parts(config, primitive, exchange).await
	}

	/// Build a pipeline around caller-supplied transfer and digest seams
	pub async fn with_parts(
		config: Config,
		primitive: Box<dyn TransferPrimitive>,
		exchange: Box<dyn DigestExchange>,
	) -> Result<Self, RelayError> {
		config.validate()?;
		let state = config.state();
		state.ensure().await?;
		let (synced, verification) = state.open_ledgers().await?;

		let matcher = SegmentMatcher::new(&config.segment_patterns)?;
		let retention = if config.runs_retention() {
			Some(RetentionManager::new(&config, matcher.clone()))
		} else {
			None
		};

		Ok(Pipeline {
			detector: CompletenessDetector::new(config.modification_threshold(), config.settling_delay()),
			gate: PreconditionGate::new(&config),
			transfer: TransferEngine::new(&config, primitive),
			verifier: IntegrityVerifier::new(&config, exchange),
			retention,
			matcher,
			state,
			synced,
			verification,
			config,
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn sync_ledger(&self) -> &SyncLedger {
		&self.synced
	}

	pub fn verification_ledger(&self) -> &VerificationLedger {
		&self.verification
	}

	/// Startup check: a missing transfer primitive is fatal
	pub async fn ensure_available(&self) -> Result<(), RelayError> {
		self.transfer.ensure_available().await
	}

	/// Run one full pass; failures are logged and reported, never returned
	pub async fn run_cycle(&mut self) -> CycleReport {
		let id = Uuid::new_v4();
		let span = tracing::info_span!("cycle", id = %id, node = %self.config.node);
		async {
			let report = match self.run_stages().await {
				Ok(report) => report,
				Err((mut report, e)) => {
					error!("Cycle aborted: {}", e);
					report.outcome = CycleOutcome::Aborted { reason: e.to_string() };
					report
				}
			};
			log_summary(&report);
			report
		}
		.instrument(span)
		.await
	}

	async fn run_stages(&mut self) -> Result<CycleReport, (CycleReport, RelayError)> {
		if let Err(e) = self.gate.check().await {
			error!("Skipping cycle: {}", e);
			return Ok(CycleReport::skipped(e.to_string()));
		}

		let mut report = CycleReport::new();
		if let Err(e) = self.reload_ledgers().await {
			return Err((report, e));
		}

		// Detect
		let segments = match scan_segments(&self.config.source_dir, &self.matcher).await {
			Ok(segments) => segments,
			Err(e) => {
				let e = RelayError::Other {
					message: format!("Cannot scan {}: {}", self.config.source_dir.display(), e),
				};
				return Err((report, e));
			}
		};
		let candidates: Vec<Segment> =
			segments.into_iter().filter(|segment| !self.synced.contains(&segment.key)).collect();
		report.candidates = candidates.len();

		let mut batch = Vec::new();
		for (segment, completeness) in self.detector.classify(candidates).await {
			match completeness {
				Completeness::Complete => batch.push(segment.key),
				Completeness::Incomplete => report.incomplete += 1,
				Completeness::Unreadable => report.unreadable += 1,
			}
		}

		// Transfer
		match self.transfer.transfer_batch(batch, &mut self.synced).await {
			Ok(BatchResult::Committed(keys)) => report.transferred = keys,
			Ok(BatchResult::Failed { .. }) => report.transfer_failed = true,
			Ok(BatchResult::Empty) | Ok(BatchResult::DryRun(_)) => {}
			Err(e) => return Err((report, e)),
		}

		// Verify
		match self.verifier.verify_pending(&self.synced, &mut self.verification).await {
			Ok(verified) => {
				report.verified = verified.verified;
				report.mismatched = verified.mismatched;
				report.verify_deferred = verified.deferred;
			}
			Err(e) => return Err((report, e)),
		}

		// Retention
		if let Some(retention) = &self.retention {
			match retention.reclaim(&self.verification).await {
				Ok(reclaimed) => {
					report.reclaimed = reclaimed.reclaimed;
					report.bytes_reclaimed = reclaimed.bytes_reclaimed;
				}
				Err(e) => return Err((report, RelayError::Io(e))),
			}
		}

		Ok(report)
	}

	async fn reload_ledgers(&mut self) -> Result<(), RelayError> {
		let (synced, verification) = self.state.open_ledgers().await?;
		self.synced = synced;
		self.verification = verification;
		Ok(())
	}

	/// Poll until `shutdown` fires; shutdown is honored between cycles only
	pub async fn run(&mut self, shutdown: &ShutdownSignal) {
		info!(
			"Starting {} loop for {} -> {} every {}s",
			self.config.role,
			self.config.source_dir.display(),
			self.config.destination_dir.display(),
			self.config.poll_interval_secs
		);

		while !shutdown.is_triggered() {
			self.run_cycle().await;

			tokio::select! {
				_ = tokio::time::sleep(self.config.poll_interval()) => {}
				_ = shutdown.wait() => {}
			}
		}
		info!("Shutdown requested, loop stopped at cycle boundary");
	}

	/// Ledger-derived state of a segment still present in the store
	pub fn segment_state(&self, segment: &Segment, now: SystemTime) -> SegmentState {
		match self.verification.verdict(&segment.key) {
			Some(Verdict::Matches) => SegmentState::Verified,
			Some(Verdict::Mismatch) => SegmentState::Mismatch,
			None if self.synced.contains(&segment.key) => SegmentState::Transferred,
			None if segment.age(now) > self.config.modification_threshold() => SegmentState::Complete,
			None => SegmentState::Observed,
		}
	}

	/// State of every segment in the store plus reclaimed ones
	///
	/// Completeness here uses the age threshold only; the settling sample is
	/// taken by the cycle itself.
	pub async fn status(&mut self) -> Result<Vec<(String, SegmentState)>, RelayError> {
		self.reload_ledgers().await?;
		let segments = scan_segments(&self.config.source_dir, &self.matcher).await?;
		let now = SystemTime::now();

		let mut states: Vec<(String, SegmentState)> =
			segments.iter().map(|segment| (segment.key.clone(), self.segment_state(segment, now))).collect();
		for record in self.verification.records() {
			let present = segments.iter().any(|segment| segment.key == record.key);
			if !present && record.verdict == Verdict::Matches {
				states.push((record.key.clone(), SegmentState::Reclaimed));
			}
		}
		states.sort();
		Ok(states)
	}
}

fn log_summary(report: &CycleReport) {
	match &report.outcome {
		CycleOutcome::Completed => info!(
			"Cycle done: {} candidates ({} incomplete, {} unreadable), {} transferred{}, {} verified, {} mismatched, {} deferred, {} reclaimed ({} bytes)",
			report.candidates,
			report.incomplete,
			report.unreadable,
			report.transferred.len(),
			if report.transfer_failed { " (batch failed)" } else { "" },
			report.verified.len(),
			report.mismatched.len(),
			report.verify_deferred,
			report.reclaimed.len(),
			report.bytes_reclaimed
		),
		CycleOutcome::Skipped { reason } => info!("Cycle skipped: {}", reason),
		CycleOutcome::Aborted { reason } => info!("Cycle aborted: {}", reason),
	}
}

// vim: ts=4
