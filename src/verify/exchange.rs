//! Source digest exchange
//!
//! The verifier needs the digest of the *source* copy of a segment. When the
//! source store is addressable from this node it is computed locally;
//! otherwise a `segrelay serve-digest <dir>` process on the source node is
//! reached over ssh and asked one path at a time:
//!
//! ```text
//! -> {"path":"day1/seg_20250101_000000.wav"}
//! <- {"path":"day1/seg_20250101_000000.wav","digest":"af13...3262"}
//! ```
//!
//! A response without `digest` means the file is absent on the source; a
//! response with `error` means the peer could not read it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::digest_file;
use crate::config::{Config, DigestSource};
use crate::error::ExchangeError;
use crate::logging::*;
use crate::validation::validate_segment_key;

/// One request line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRequest {
	pub path: String,
}

/// One response line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestResponse {
	pub path: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub digest: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl DigestResponse {
	/// Answer a request by digesting `root/path`
	pub async fn answer(root: &Path, request: &DigestRequest, chunk_size: usize) -> DigestResponse {
		let path = request.path.clone();
		if let Err(e) = validate_segment_key(&request.path) {
			return DigestResponse { path, digest: None, error: Some(e.to_string()) };
		}
		match digest_file(&root.join(&request.path), chunk_size).await {
			Ok(digest) => DigestResponse { path, digest: Some(digest), error: None },
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				DigestResponse { path, digest: None, error: None }
			}
			Err(e) => DigestResponse { path, digest: None, error: Some(e.to_string()) },
		}
	}
}

/// Supplies source digests to the Integrity Verifier
///
/// `Ok(None)` means the source copy does not exist.
#[async_trait]
pub trait DigestExchange: Send {
	async fn source_digest(&mut self, key: &str) -> Result<Option<String>, ExchangeError>;
}

/// Build the exchange named by the configuration
pub fn exchange_from_config(config: &Config) -> Box<dyn DigestExchange> {
	match config.verify.source {
		DigestSource::Local => {
			Box::new(LocalDigestExchange::new(config.source_dir.clone(), config.verify.chunk_size))
		}
		DigestSource::Remote => {
			let connector = SshConnector::new(
				config.verify.remote_host.clone().unwrap_or_default(),
				config.verify.remote_command.clone(),
				config.verify.remote_dir.clone().unwrap_or_default(),
			);
			Box::new(RemoteDigestExchange::new(Box::new(connector), config.verify.timeout()))
		}
	}
}

// ============================================================================
// LOCAL
// ============================================================================

/// Digests the source copy directly from a locally addressable store
pub struct LocalDigestExchange {
	root: PathBuf,
	chunk_size: usize,
}

impl LocalDigestExchange {
	pub fn new(root: PathBuf, chunk_size: usize) -> Self {
		LocalDigestExchange { root, chunk_size }
	}
}

#[async_trait]
impl DigestExchange for LocalDigestExchange {
	async fn source_digest(&mut self, key: &str) -> Result<Option<String>, ExchangeError> {
		let request = DigestRequest { path: key.to_string() };
		let response = DigestResponse::answer(&self.root, &request, self.chunk_size).await;
		match response.error {
			Some(message) => Err(ExchangeError::PeerFailed { path: response.path, message }),
			None => Ok(response.digest),
		}
	}
}

// ============================================================================
// REMOTE
// ============================================================================

/// An open request/response channel to a digest server
pub struct Peer {
	send: Box<dyn AsyncWrite + Send + Unpin>,
	recv: Box<dyn AsyncBufRead + Send + Unpin>,
	_child: Option<Child>,
}

impl Peer {
	pub fn new(
		send: impl AsyncWrite + Send + Unpin + 'static,
		recv: impl AsyncBufRead + Send + Unpin + 'static,
	) -> Self {
		Peer { send: Box::new(send), recv: Box::new(recv), _child: None }
	}

	/// Keep `child` alive (and killed on drop) for as long as the channel
	pub fn with_child(mut self, child: Child) -> Self {
		self._child = Some(child);
		self
	}
}

/// Opens channels to a digest server
#[async_trait]
pub trait PeerConnector: Send + Sync {
	/// Human-readable peer name for logs
	fn describe(&self) -> String;

	async fn connect(&self) -> Result<Peer, ExchangeError>;
}

/// Runs `<command> serve-digest <dir>` on the source node over ssh
pub struct SshConnector {
	host: String,
	command: String,
	dir: PathBuf,
}

impl SshConnector {
	pub fn new(host: String, command: String, dir: PathBuf) -> Self {
		SshConnector { host, command, dir }
	}
}

#[async_trait]
impl PeerConnector for SshConnector {
	fn describe(&self) -> String {
		format!("{}:{}", self.host, self.dir.display())
	}

	async fn connect(&self) -> Result<Peer, ExchangeError> {
		let mut child = Command::new("ssh")
			.arg(&self.host)
			.arg(&self.command)
			.arg("serve-digest")
			.arg(&self.dir)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| ExchangeError::SpawnFailed { cmd: format!("ssh {}", self.host), source: e })?;

		let send: ChildStdin = child
			.stdin
			.take()
			.ok_or(ExchangeError::StdioUnavailable { what: "stdin".to_string() })?;
		let stdout: ChildStdout = child
			.stdout
			.take()
			.ok_or(ExchangeError::StdioUnavailable { what: "stdout".to_string() })?;

		Ok(Peer::new(send, BufReader::new(stdout)).with_child(child))
	}
}

/// Asks a `serve-digest` process on the source node, one path at a time
///
/// The connection is opened on first use and dropped after any failure other
/// than an error answer, so the next request reconnects. Each request,
/// connection included, must finish within the configured timeout.
pub struct RemoteDigestExchange {
	connector: Box<dyn PeerConnector>,
	timeout: Duration,
	peer: Option<Peer>,
}

impl RemoteDigestExchange {
	pub fn new(connector: Box<dyn PeerConnector>, timeout: Duration) -> Self {
		RemoteDigestExchange { connector, timeout, peer: None }
	}

	async fn exchange(&mut self, key: &str) -> Result<Option<String>, ExchangeError> {
		if self.peer.is_none() {
			info!("Connecting to {} for source digests", self.connector.describe());
			self.peer = Some(self.connector.connect().await?);
		}
		let peer = match self.peer.as_mut() {
			Some(peer) => peer,
			None => return Err(ExchangeError::Disconnected),
		};
		Self::request(peer, key).await
	}

	async fn request(peer: &mut Peer, key: &str) -> Result<Option<String>, ExchangeError> {
		let mut line = serde_json::to_string(&DigestRequest { path: key.to_string() })?;
		line.push('\n');
		peer.send.write_all(line.as_bytes()).await?;
		peer.send.flush().await?;

		let mut answer = String::new();
		if peer.recv.read_line(&mut answer).await? == 0 {
			return Err(ExchangeError::Disconnected);
		}
		let response: DigestResponse = json5::from_str(answer.trim())?;

		if response.path != key {
			return Err(ExchangeError::PathMismatch {
				requested: key.to_string(),
				answered: response.path,
			});
		}
		if let Some(message) = response.error {
			return Err(ExchangeError::PeerFailed { path: response.path, message });
		}
		Ok(response.digest)
	}
}

#[async_trait]
impl DigestExchange for RemoteDigestExchange {
	async fn source_digest(&mut self, key: &str) -> Result<Option<String>, ExchangeError> {
		let timeout = self.timeout;
		let result = match tokio::time::timeout(timeout, self.exchange(key)).await {
			Ok(result) => result,
			Err(_) => Err(ExchangeError::Timeout { after: timeout }),
		};
		if let Err(e) = &result {
			// PeerFailed is an answer, not a broken channel
			if !matches!(e, ExchangeError::PeerFailed { .. }) {
				warn!(
					"Digest exchange with {} failed: {} (reconnecting next time)",
					self.connector.describe(),
					e
				);
				self.peer = None;
			}
		}
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::serve::serve_digest;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use tempfile::TempDir;

	#[derive(Clone, Copy)]
	enum Server {
		Honest,
		WrongPath,
		Silent,
		HangUpFirst,
	}

	/// Connects to an in-process server over a duplex pipe
	struct DuplexConnector {
		root: PathBuf,
		server: Server,
		connects: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl PeerConnector for DuplexConnector {
		fn describe(&self) -> String {
			"duplex".to_string()
		}

		async fn connect(&self) -> Result<Peer, ExchangeError> {
			let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
			let (client, server) = tokio::io::duplex(4096);
			let (server_read, mut server_write) = tokio::io::split(server);
			let root = self.root.clone();
			let behavior = self.server;

			tokio::spawn(async move {
				let mut reader = BufReader::new(server_read);
				let mut line = String::new();
				match behavior {
					Server::HangUpFirst if attempt == 0 => {}
					Server::Honest | Server::HangUpFirst => {
						let _ = serve_digest(&root, 4096, reader, server_write).await;
					}
					Server::WrongPath => {
						while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
							let _ = server_write.write_all(b"{\"path\":\"other.wav\",\"digest\":\"00\"}\n").await;
							line.clear();
						}
					}
					Server::Silent => {
						while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
							line.clear();
						}
						drop(server_write);
					}
				}
			});

			let (client_read, client_write) = tokio::io::split(client);
			Ok(Peer::new(client_write, BufReader::new(client_read)))
		}
	}

	fn remote(root: &Path, server: Server, timeout: Duration) -> (RemoteDigestExchange, Arc<AtomicUsize>) {
		let connects = Arc::new(AtomicUsize::new(0));
		let connector = DuplexConnector { root: root.to_path_buf(), server, connects: connects.clone() };
		(RemoteDigestExchange::new(Box::new(connector), timeout), connects)
	}

	#[tokio::test]
	async fn test_remote_exchange_keeps_connection_across_answers() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("seg.wav"), b"audio").unwrap();
		let expected = blake3::hash(b"audio").to_hex().to_string();
		let (mut exchange, connects) = remote(dir.path(), Server::Honest, Duration::from_secs(5));

		assert_eq!(exchange.source_digest("seg.wav").await.unwrap(), Some(expected.clone()));
		assert_eq!(exchange.source_digest("gone.wav").await.unwrap(), None);
		let refused = exchange.source_digest("../etc/passwd").await;
		assert!(matches!(refused, Err(ExchangeError::PeerFailed { .. })));
		assert_eq!(exchange.source_digest("seg.wav").await.unwrap(), Some(expected));
		assert_eq!(connects.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_remote_exchange_rejects_answer_for_other_path() {
		let dir = TempDir::new().unwrap();
		let (mut exchange, connects) = remote(dir.path(), Server::WrongPath, Duration::from_secs(5));

		match exchange.source_digest("seg.wav").await {
			Err(ExchangeError::PathMismatch { requested, answered }) => {
				assert_eq!(requested, "seg.wav");
				assert_eq!(answered, "other.wav");
			}
			other => panic!("expected PathMismatch, got {:?}", other),
		}
		assert!(exchange.source_digest("seg.wav").await.is_err());
		assert_eq!(connects.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_remote_exchange_reconnects_after_hang_up() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("seg.wav"), b"audio").unwrap();
		let (mut exchange, connects) = remote(dir.path(), Server::HangUpFirst, Duration::from_secs(5));

		let first = exchange.source_digest("seg.wav").await;
		assert!(first.is_err());
		assert!(!matches!(first, Err(ExchangeError::PeerFailed { .. })));

		let second = exchange.source_digest("seg.wav").await.unwrap();
		assert_eq!(second, Some(blake3::hash(b"audio").to_hex().to_string()));
		assert_eq!(connects.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_remote_exchange_times_out_and_reconnects() {
		let dir = TempDir::new().unwrap();
		let (mut exchange, connects) = remote(dir.path(), Server::Silent, Duration::from_millis(100));

		let result = exchange.source_digest("seg.wav").await;
		assert!(matches!(result, Err(ExchangeError::Timeout { .. })));
		let result = exchange.source_digest("seg.wav").await;
		assert!(matches!(result, Err(ExchangeError::Timeout { .. })));
		assert_eq!(connects.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_local_exchange_digest_and_missing() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("seg.wav"), b"audio").unwrap();

		let mut exchange = LocalDigestExchange::new(dir.path().to_path_buf(), 4096);
		let digest = exchange.source_digest("seg.wav").await.unwrap();
		assert_eq!(digest, Some(blake3::hash(b"audio").to_hex().to_string()));
		assert_eq!(exchange.source_digest("gone.wav").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_answer_rejects_escaping_path() {
		let dir = TempDir::new().unwrap();
		let request = DigestRequest { path: "../etc/passwd".to_string() };
		let response = DigestResponse::answer(dir.path(), &request, 4096).await;
		assert!(response.digest.is_none());
		assert!(response.error.is_some());
	}

	#[test]
	fn test_response_wire_format() {
		let response = DigestResponse { path: "a.wav".to_string(), digest: None, error: None };
		assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"path":"a.wav"}"#);

		let parsed: DigestResponse = json5::from_str(r#"{path: "a.wav", digest: "00ff"}"#).unwrap();
		assert_eq!(parsed.digest.as_deref(), Some("00ff"));
	}
}

// vim: ts=4
