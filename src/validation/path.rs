//! Path validation functions
//!
//! Ledger keys are relative paths inside a Segment Store. A key that is
//! absolute or climbs out with `..` would let a hand-edited ledger line point
//! the Retention Manager at a file outside the store, so every key is checked
//! before it is trusted.

use std::path::{Component, Path};

use super::ValidationError;

/// Check if a path is safe (no parent directory references)
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Validate a path is safe
pub fn validate_path_safe(path: &Path) -> Result<(), ValidationError> {
	if !is_path_safe(path) {
		return Err(ValidationError::PathError(
			"Path contains parent directory reference (..)".to_string(),
		));
	}
	Ok(())
}

/// Validate that path is relative (not absolute)
pub fn validate_path_relative(path: &Path) -> Result<(), ValidationError> {
	if path.is_absolute() {
		return Err(ValidationError::PathError(format!(
			"Path must be relative, got absolute path: {:?}",
			path
		)));
	}
	Ok(())
}

/// Validate a string used as a ledger key
///
/// The key must be non-empty, fit on one ledger line without surrounding
/// whitespace, be relative, and not escape the root it is joined to.
pub fn validate_segment_key(key: &str) -> Result<(), ValidationError> {
	if key.trim().is_empty() {
		return Err(ValidationError::PathError("Segment path is empty".to_string()));
	}
	if key.trim() != key {
		return Err(ValidationError::PathError(format!(
			"Segment path has leading or trailing whitespace: {:?}",
			key
		)));
	}
	if key.contains('\n') || key.contains('\r') {
		return Err(ValidationError::PathError(format!(
			"Segment path contains a line break: {:?}",
			key
		)));
	}
	let path = Path::new(key);
	validate_path_relative(path)?;
	validate_path_safe(path)
}

/// Render a relative path as a ledger key (forward slashes, no leading `./`)
///
/// `None` when a component is not valid UTF-8; such a file has no ledger key.
pub fn segment_key(rel: &Path) -> Option<String> {
	let mut parts = Vec::new();
	for component in rel.components() {
		if let Component::Normal(part) = component {
			parts.push(part.to_str()?);
		}
	}
	Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_is_path_safe_normal() {
		assert!(is_path_safe(Path::new("seg.wav")));
		assert!(is_path_safe(Path::new("2025/01/seg.wav")));
	}

	#[test]
	fn test_is_path_safe_with_parent() {
		assert!(!is_path_safe(Path::new("../seg.wav")));
		assert!(!is_path_safe(Path::new("a/../../seg.wav")));
	}

	#[test]
	fn test_validate_segment_key_ok() {
		assert!(validate_segment_key("seg_20250101_000000.wav").is_ok());
		assert!(validate_segment_key("day1/seg_20250101_000000.wav").is_ok());
	}

	#[test]
	fn test_validate_segment_key_rejects_escapes() {
		assert!(validate_segment_key("/etc/passwd").is_err());
		assert!(validate_segment_key("../outside.wav").is_err());
		assert!(validate_segment_key("").is_err());
		assert!(validate_segment_key("a\nb.wav").is_err());
	}

	#[test]
	fn test_validate_segment_key_rejects_surrounding_whitespace() {
		assert!(validate_segment_key(" seg_20250101_000000.wav").is_err());
		assert!(validate_segment_key("seg_20250101_000000.wav\t").is_err());
		assert!(validate_segment_key("take 1.wav").is_ok());
	}

	#[test]
	fn test_segment_key_normalizes() {
		assert_eq!(segment_key(Path::new("./day1/seg.wav")).as_deref(), Some("day1/seg.wav"));
		assert_eq!(segment_key(Path::new("seg.wav")).as_deref(), Some("seg.wav"));
	}

	#[cfg(unix)]
	#[test]
	fn test_segment_key_refuses_non_utf8() {
		use std::ffi::OsStr;
		use std::os::unix::ffi::OsStrExt;

		let name = OsStr::from_bytes(b"seg_\xff.wav");
		assert_eq!(segment_key(Path::new(name)), None);
		assert_eq!(segment_key(&Path::new("day1").join(name)), None);
	}
}

// vim: ts=4
