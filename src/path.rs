//! Deterministic mapping between logical filesystem paths and the two
//! store keys that back each entry.

use crate::error::{FfsError, Result};

const MAX_SEGMENT_LEN: usize = 256;

/// Rejects any path with a segment of 256 bytes or more (`ENAMETOOLONG`).
///
/// Run before any store interaction.
pub fn validate_path(path: &str) -> Result<()> {
    for segment in path.split('/') {
        if segment.len() >= MAX_SEGMENT_LEN {
            return Err(FfsError::NameTooLong(path.to_string()));
        }
    }
    Ok(())
}

fn strip_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// `meta/<path-without-leading-slash>`
pub fn meta_key(path: &str) -> String {
    format!("meta/{}", strip_leading_slash(path))
}

/// `data/<path-without-leading-slash>`
pub fn data_key(path: &str) -> String {
    format!("data/{}", strip_leading_slash(path))
}

/// Inverse of [`meta_key`]: strips the `meta/` prefix and re-prepends `/`.
pub fn path_from_meta_key(key: &str) -> String {
    format!("/{}", key.strip_prefix("meta/").unwrap_or(key))
}

/// Splits a path into `(parent, name)`. The root has no parent.
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

/// Joins a parent directory and a child name into an absolute path.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for p in ["/", "/a", "/a/b/c"] {
            assert_eq!(path_from_meta_key(&meta_key(p)), p);
        }
    }

    #[test]
    fn key_schema_bit_exact() {
        assert_eq!(meta_key("/a/b/c"), "meta/a/b/c");
        assert_eq!(data_key("/a/b/c"), "data/a/b/c");
        assert_eq!(meta_key("/"), "meta/");
    }

    #[test]
    fn rejects_long_segment() {
        let long = "a".repeat(256);
        let path = format!("/{long}");
        assert!(matches!(validate_path(&path), Err(FfsError::NameTooLong(_))));
    }

    #[test]
    fn accepts_max_short_segment() {
        let ok = "a".repeat(255);
        assert!(validate_path(&format!("/{ok}")).is_ok());
    }

    #[test]
    fn split_join() {
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(join("/a/b", "c"), "/a/b/c");
        assert_eq!(join("/", "a"), "/a");
    }
}
