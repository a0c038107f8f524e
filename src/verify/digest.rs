//! Streaming content digest

use std::io;
use std::path::Path;
use tokio::fs as afs;
use tokio::io::AsyncReadExt;

/// BLAKE3 digest of a file read in `chunk_size` blocks, lowercase hex
pub async fn digest_file(path: &Path, chunk_size: usize) -> io::Result<String> {
	let mut file = afs::File::open(path).await?;
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0u8; chunk_size.max(1)];

	loop {
		let n = file.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}

	Ok(hasher.finalize().to_hex().to_string())
}

/// Compare two hex digests ignoring case
///
/// Anything that is not valid hex never compares equal.
pub fn digests_equal(a: &str, b: &str) -> bool {
	match (hex::decode(a.trim()), hex::decode(b.trim())) {
		(Ok(a), Ok(b)) => !a.is_empty() && a == b,
		_ => false,
	}
}


// vim: ts=4
