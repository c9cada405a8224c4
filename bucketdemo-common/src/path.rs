//! Validation and splitting of `/bucket/key` paths.

use crate::error::StorageError;

/// Split a file path `/bucket/key` into `(bucket, key)`.
pub fn split_file_path(path: &str) -> Result<(&str, &str), StorageError> {
    let (bucket, key) = split(path)?;
    match key {
        Some(key) if !key.is_empty() => Ok((bucket, key)),
        _ => Err(invalid(path, "expected /bucket/key")),
    }
}

/// Split a bucket path `/bucket` or `/bucket/prefix` into `(bucket, prefix)`.
pub fn split_bucket_path(path: &str) -> Result<(&str, &str), StorageError> {
    let (bucket, prefix) = split(path)?;
    Ok((bucket, prefix.unwrap_or("")))
}

/// Join a bucket name and key back into a full path.
pub fn join(bucket: &str, key: &str) -> String {
    format!("/{}/{}", bucket, key)
}

fn split(path: &str) -> Result<(&str, Option<&str>), StorageError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| invalid(path, "must start with '/'"))?;
    let (bucket, key) = match rest.split_once('/') {
        Some((bucket, key)) => (bucket, Some(key)),
        None => (rest, None),
    };
    validate_bucket_name(bucket).map_err(|reason| invalid(path, reason))?;
    Ok((bucket, key))
}

fn validate_bucket_name(bucket: &str) -> Result<(), &'static str> {
    if bucket.len() < 3 {
        return Err("bucket name must be at least 3 characters");
    }
    let valid = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
    if !valid {
        return Err("bucket name may only contain [a-z0-9._-]");
    }
    Ok(())
}

fn invalid(path: &str, reason: &str) -> StorageError {
    StorageError::Configuration(format!("invalid path {:?}: {}", path, reason))
}
