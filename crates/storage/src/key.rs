//! Object key validation.
//!
//! Keys coming out of a listing are opaque and passed through untouched, but
//! keys the registry *builds* (usually from request parameters) have to be
//! checked before they reach a backend. For a bucket a funny key is just a
//! miss; for the local backend it's a path traversal.

use crate::error::{ErrorKind, Result};

/// Validates and normalizes an object key.
///
/// Segments are `/`-delimited. Empty and `.` segments are dropped, `..` pops
/// the previous segment and may never climb above the root. NUL bytes are
/// rejected outright.
///
/// # Returns
/// Returns the normalized key if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use s3reg_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("hashicorp/aws/5.0.0/shasum").is_ok());
/// assert!(validate_key("a/../shasum").is_ok()); // (never leaves the root)
/// // Invalid keys
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/../../b").is_err());
/// assert!(validate_key("a\0b").is_err());
/// // Keys get resolved
/// assert_eq!(validate_key("wrong/../still-wrong/.././correct//./key.zip/").unwrap(), "correct/key.zip");
/// ```
pub fn validate(key: impl AsRef<str>) -> Result<String> {
    let key = key.as_ref();
    if key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(key.to_string()));
                }
            },
            normal => segments.push(normal),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
        false => Ok(segments.join("/")),
    }
}
