//! Signal handling for graceful termination
//!
//! SIGINT/SIGTERM only request shutdown; the polling loop finishes the cycle
//! it is in and exits at the next cycle boundary.

use tokio::sync::watch;

use crate::logging::*;

/// Shared shutdown flag that can also be awaited
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
	tx: std::sync::Arc<watch::Sender<bool>>,
	rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
	pub fn new() -> Self {
		let (tx, rx) = watch::channel(false);
		ShutdownSignal { tx: std::sync::Arc::new(tx), rx }
	}

	pub fn trigger(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_triggered(&self) -> bool {
		*self.rx.borrow()
	}

	/// Resolve once shutdown has been requested
	pub async fn wait(&self) {
		let mut rx = self.rx.clone();
		while !*rx.borrow_and_update() {
			if rx.changed().await.is_err() {
				return;
			}
		}
	}
}

impl Default for ShutdownSignal {
	fn default() -> Self {
		Self::new()
	}
}

/// Setup signal handlers that trigger `shutdown` on SIGTERM or SIGINT
pub fn setup_signal_handlers(shutdown: ShutdownSignal) {
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => info!("Received SIGTERM, stopping after the current cycle"),
			_ = sigint.recv() => info!("Received SIGINT, stopping after the current cycle"),
		}
		shutdown.trigger();
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_wait_resolves_after_trigger() {
		let shutdown = ShutdownSignal::new();
		assert!(!shutdown.is_triggered());

		let waiter = shutdown.clone();
		let handle = tokio::spawn(async move { waiter.wait().await });
		tokio::time::sleep(Duration::from_millis(20)).await;
		shutdown.trigger();

		tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
		assert!(shutdown.is_triggered());
	}

	#[tokio::test]
	async fn test_wait_after_trigger_is_immediate() {
		let shutdown = ShutdownSignal::new();
		shutdown.trigger();
		tokio::time::timeout(Duration::from_millis(100), shutdown.wait()).await.unwrap();
	}
}

// vim: ts=4
