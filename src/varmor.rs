//! Versioned armoring for sealed snippet bodies
//!
//! Sealed bytes are stored in a text field of the snippet record, so the
//! armored form is:
//! - Free of whitespace (including newlines)
//! - Restricted to the base64url alphabet after the version prefix
//! - Self-describing: the prefix names the binary layout version

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Magic prefix shared by all snipvault versions
const MAGIC_PREFIX: &str = "snipvault";

/// Version 1 magic marker
const V1_MAGIC: &str = "snipvault1:";

/// Binary layout versions this build can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
}

/// Wrap bytes in armor, returning the armored string
///
/// Format: snipvault1:{base64url-no-padding}
pub fn wrap(body: &[u8]) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(body);
    format!("{}{}", V1_MAGIC, encoded)
}

/// Unwrap an armored string, returning the layout version and the original bytes
pub fn unwrap(armored: &str) -> Result<(Version, Vec<u8>)> {
    if armored.len() < V1_MAGIC.len() {
        return Err(VaultError::with_kind(
            ErrorCategory::InvalidInput,
            ErrorKind::ArmoringInvalid,
            "input size smaller than magic marker; likely truncated",
        ));
    }

    if let Some(encoded) = armored.strip_prefix(V1_MAGIC) {
        let body = URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
            VaultError::with_kind_and_source(
                ErrorCategory::InvalidInput,
                ErrorKind::ArmoringDecode,
                format!("base64 decoding failed: {}", e),
                e,
            )
        })?;
        Ok((Version::V1, body))
    } else if armored.starts_with(MAGIC_PREFIX) {
        Err(VaultError::with_kind(
            ErrorCategory::InvalidInput,
            ErrorKind::ArmoringFromFuture,
            "input claims to be snipvault, but not a version we support",
        ))
    } else {
        Err(VaultError::with_kind(
            ErrorCategory::InvalidInput,
            ErrorKind::ArmoringInvalid,
            "input unrecognized as snipvault data",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bytes() {
        let armored = wrap(b"");
        assert_eq!(armored, "snipvault1:");
        let (version, unwrapped) = unwrap(&armored).unwrap();
        assert_eq!(version, Version::V1);
        assert!(unwrapped.is_empty());
    }

    #[test]
    fn test_all_byte_values() {
        let bytes: Vec<u8> = (0..=255).collect();
        let armored = wrap(&bytes);

        assert_eq!(
            armored,
            "snipvault1:AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8gISIjJCUmJygpKissLS4vMDEyMzQ1Njc4OTo7PD0-P0BBQkNERUZHSElKS0xNTk9QUVJTVFVWV1hZWltcXV5fYGFiY2RlZmdoaWprbG1ub3BxcnN0dXZ3eHl6e3x9fn-AgYKDhIWGh4iJiouMjY6PkJGSk5SVlpeYmZqbnJ2en6ChoqOkpaanqKmqq6ytrq-wsbKztLW2t7i5uru8vb6_wMHCw8TFxsfIycrLzM3Oz9DR0tPU1dbX2Nna29zd3t_g4eLj5OXm5-jp6uvs7e7v8PHy8_T19vf4-fr7_P3-_w"
        );

        let (_, unwrapped) = unwrap(&armored).unwrap();
        assert_eq!(bytes, unwrapped);
    }

    #[test]
    fn test_truncated_input() {
        let err = unwrap("snip").expect_err("expected truncated input error");
        assert_eq!(err.kind, Some(ErrorKind::ArmoringInvalid));
    }

    #[test]
    fn test_wrong_version() {
        let err = unwrap("snipvault2:AAAA").expect_err("expected unsupported version error");
        assert_eq!(err.kind, Some(ErrorKind::ArmoringFromFuture));
    }

    #[test]
    fn test_not_snipvault() {
        let err = unwrap("function quantum_sort(arr) { return arr.sort(); }")
            .expect_err("expected non-snipvault error");
        assert_eq!(err.kind, Some(ErrorKind::ArmoringInvalid));
    }

    #[test]
    fn test_bad_base64() {
        let err = unwrap("snipvault1:bad$$").expect_err("expected base64 decode error");
        assert_eq!(err.kind, Some(ErrorKind::ArmoringDecode));
    }

    #[test]
    fn test_printable_and_url_safe() {
        let bytes = vec![0xFFu8; 100];
        let armored = wrap(&bytes);

        assert!(armored.chars().all(|c| c.is_ascii_graphic()));
        assert!(!armored.contains('+'));
        assert!(!armored.contains('/'));
        assert!(!armored.contains('='));
    }
}
