//! Configuration validation functions

use std::path::Path;

use super::ValidationError;

/// Validate the source and destination roots of a node
///
/// Both must be set and they must not be the same directory (or nested inside
/// each other), otherwise a transfer would copy the store onto itself.
pub fn validate_roots(source: &Path, destination: &Path) -> Result<(), ValidationError> {
	if source.as_os_str().is_empty() {
		return Err(ValidationError::ConfigError("sourceDir must be set".to_string()));
	}
	if destination.as_os_str().is_empty() {
		return Err(ValidationError::ConfigError("destinationDir must be set".to_string()));
	}
	if source == destination || source.starts_with(destination) || destination.starts_with(source)
	{
		return Err(ValidationError::ConfigError(format!(
			"sourceDir {:?} and destinationDir {:?} overlap",
			source, destination
		)));
	}
	Ok(())
}

/// Validate the poll interval in seconds
pub fn validate_poll_interval_secs(secs: u64) -> Result<(), ValidationError> {
	if secs == 0 {
		return Err(ValidationError::ConfigError(
			"pollIntervalSecs must be greater than 0".to_string(),
		));
	}
	Ok(())
}

/// Validate a retention ceiling; zero is rejected
pub fn validate_budget(max_bytes: Option<u64>, max_files: Option<usize>) -> Result<(), ValidationError> {
	if max_bytes == Some(0) {
		return Err(ValidationError::ConfigError("retention.maxBytes must be > 0".to_string()));
	}
	if max_files == Some(0) {
		return Err(ValidationError::ConfigError("retention.maxFiles must be > 0".to_string()));
	}
	Ok(())
}

/// Validate segment glob patterns
pub fn validate_segment_patterns(patterns: &[String]) -> Result<(), ValidationError> {
	if patterns.is_empty() {
		return Err(ValidationError::ConfigError(
			"segmentPatterns must contain at least one pattern".to_string(),
		));
	}
	for pattern in patterns {
		globset::Glob::new(pattern).map_err(|e| {
			ValidationError::ConfigError(format!("Invalid segment pattern '{}': {}", pattern, e))
		})?;
	}
	Ok(())
}

/// Validate the transfer retry count
pub fn validate_max_attempts(count: u32) -> Result<(), ValidationError> {
	if count == 0 {
		return Err(ValidationError::ConfigError(
			"transfer.maxAttempts must be at least 1".to_string(),
		));
	}
	if count > 100 {
		return Err(ValidationError::ConfigError(format!("Retry count too high: {}", count)));
	}
	Ok(())
}

/// Validate the digest read chunk size
pub fn validate_chunk_size(size: usize) -> Result<(), ValidationError> {
	if size < 512 {
		return Err(ValidationError::ConfigError(format!(
			"verify.chunkSize must be at least 512 bytes, got {}",
			size
		)));
	}
	Ok(())
}

/// Validate the remote digest timeout
pub fn validate_timeout_secs(secs: u64) -> Result<(), ValidationError> {
	if secs == 0 {
		return Err(ValidationError::ConfigError("verify.timeoutSecs must be greater than 0".to_string()));
	}
	Ok(())
}


// vim: ts=4
