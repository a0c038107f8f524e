//! `segrelay serve-digest <dir>`: answer digest requests for a Segment Store
//!
//! Spawned over ssh by a relay's remote digest exchange. Reads one JSON
//! request per line from stdin and writes one JSON response per line to
//! stdout until stdin closes. Logs go to stderr.

use std::error::Error;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::logging::*;
use crate::verify::{DigestRequest, DigestResponse};

/// Serve requests from `reader` until EOF
pub async fn serve_digest<R, W>(
	root: &Path,
	chunk_size: usize,
	mut reader: R,
	mut writer: W,
) -> Result<(), Box<dyn Error + Send + Sync>>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut line = String::new();
	let mut served = 0usize;

	loop {
		line.clear();
		if reader.read_line(&mut line).await? == 0 {
			break;
		}
		let trimmed = line.trim();
		if trimmed.is_empty() {
			continue;
		}

		let response = match json5::from_str::<DigestRequest>(trimmed) {
			Ok(request) => {
				debug!("Digest requested for {}", request.path);
				DigestResponse::answer(root, &request, chunk_size).await
			}
			Err(e) => {
				warn!("Malformed digest request '{}': {}", trimmed, e);
				DigestResponse {
					path: String::new(),
					digest: None,
					error: Some(format!("malformed request: {}", e)),
				}
			}
		};

		let mut out = serde_json::to_string(&response)?;
		out.push('\n');
		writer.write_all(out.as_bytes()).await?;
		writer.flush().await?;
		served += 1;
	}

	debug!("Digest client disconnected after {} requests", served);
	Ok(())
}

/// Serve over this process's stdin/stdout
pub async fn serve(dir: &Path, chunk_size: usize) -> Result<(), Box<dyn Error + Send + Sync>> {
	let root = dir.canonicalize().map_err(|e| format!("Cannot serve {}: {}", dir.display(), e))?;
	info!("Serving digests for {}", root.display());

	let reader = tokio::io::BufReader::new(tokio::io::stdin());
	serve_digest(&root, chunk_size, reader, tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;
	use tokio::io::BufReader;

	#[tokio::test]
	async fn test_round_trip_over_duplex() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("seg.wav"), b"audio").unwrap();

		let (client, server) = tokio::io::duplex(4096);
		let (server_read, server_write) = tokio::io::split(server);
		let root = dir.path().to_path_buf();
		let task = tokio::spawn(async move {
			serve_digest(&root, 4096, BufReader::new(server_read), server_write).await.unwrap();
		});

		let (client_read, mut client_write) = tokio::io::split(client);
		let mut client_read = BufReader::new(client_read);
		client_write.write_all(b"{\"path\":\"seg.wav\"}\n{\"path\":\"gone.wav\"}\nnot json\n").await.unwrap();
		client_write.shutdown().await.unwrap();

		let mut lines = Vec::new();
		let mut line = String::new();
		while client_read.read_line(&mut line).await.unwrap() > 0 {
			lines.push(serde_json::from_str::<DigestResponse>(line.trim()).unwrap());
			line.clear();
		}
		task.await.unwrap();

		assert_eq!(lines.len(), 3);
		assert_eq!(lines[0].digest, Some(blake3::hash(b"audio").to_hex().to_string()));
		assert_eq!(lines[1].path, "gone.wav");
		assert_eq!(lines[1].digest, None);
		assert!(lines[1].error.is_none());
		assert!(lines[2].error.is_some());
	}
}

// vim: ts=4
