//! `seal` and `open`: text in, armored text out, and back
//!
//! This is the only surface the rest of the crate uses for cryptography.
//! Opening never tells a caller *why* a blob did not open: a wrong password,
//! a corrupted body, a tampered length field and an unknown version all come
//! back as [`Opened::WrongKey`]. `Err` is reserved for engine faults such as
//! an unavailable entropy source.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::password::Password;
use crate::secretcrypt::{self, KdfParams};
use crate::varmor::{self, Version};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

/// Result of [`open`].
pub enum Opened {
    Plaintext(Zeroizing<String>),
    WrongKey,
}

impl Opened {
    pub fn is_wrong_key(&self) -> bool {
        matches!(self, Opened::WrongKey)
    }

    pub fn into_plaintext(self) -> Option<Zeroizing<String>> {
        match self {
            Opened::Plaintext(text) => Some(text),
            Opened::WrongKey => None,
        }
    }
}

impl fmt::Debug for Opened {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opened::Plaintext(_) => f.write_str("Plaintext([REDACTED])"),
            Opened::WrongKey => f.write_str("WrongKey"),
        }
    }
}

/// Seal `plaintext` under `password` with the default scrypt cost.
pub fn seal(plaintext: &str, password: &Password) -> Result<String> {
    seal_with_params(plaintext, password, &KdfParams::DEFAULT)
}

pub fn seal_with_params(plaintext: &str, password: &Password, kdf: &KdfParams) -> Result<String> {
    if password.is_empty() {
        return Err(VaultError::invalid_input(
            ErrorKind::EmptyPassword,
            "password must not be empty",
        ));
    }

    let ciphertext = secretcrypt::encrypt(password.as_bytes(), plaintext.as_bytes(), kdf)
        .map_err(|e| e.with_context("encryption failed"))?;
    let blob = varmor::wrap(&ciphertext);
    debug!(blob_len = blob.len(), log_n = kdf.log_n, "sealed snippet body");
    Ok(blob)
}

/// Open `blob` with `password`, paying the default scrypt cost on rejection.
pub fn open(blob: &str, password: &Password) -> Result<Opened> {
    open_with_params(blob, password, &KdfParams::DEFAULT)
}

/// Open `blob` with `password`.
///
/// The key is always derived with the parameters recorded in the blob;
/// `rejection_cost` is only spent when the blob is too malformed to get
/// that far.
pub fn open_with_params(
    blob: &str,
    password: &Password,
    rejection_cost: &KdfParams,
) -> Result<Opened> {
    let body = match varmor::unwrap(blob) {
        Ok((Version::V1, body)) => body,
        Err(_) => {
            secretcrypt::burn_key_derivation(password.as_bytes(), rejection_cost);
            debug!("blob did not open");
            return Ok(Opened::WrongKey);
        }
    };

    let bytes = match secretcrypt::decrypt(password.as_bytes(), &body, rejection_cost) {
        Ok(bytes) => bytes,
        Err(e) if e.category == ErrorCategory::EngineFault => return Err(e),
        Err(_) => {
            debug!("blob did not open");
            return Ok(Opened::WrongKey);
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) => Ok(Opened::Plaintext(Zeroizing::new(text.to_owned()))),
        Err(_) => {
            debug!("blob did not open");
            Ok(Opened::WrongKey)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::new(4, 8, 1).unwrap()
    }

    fn open_fast(blob: &str, password: &str) -> Opened {
        open_with_params(blob, &Password::from(password), &fast()).unwrap()
    }

    #[test]
    fn test_round_trip_default_params() {
        let password = Password::from("correct horse");
        let blob = seal("fn main() {}", &password).unwrap();
        let opened = open(&blob, &password).unwrap();
        assert_eq!(opened.into_plaintext().unwrap().as_str(), "fn main() {}");
    }

    #[test]
    fn test_empty_plaintext_with_abc() {
        let blob = seal_with_params("", &Password::from("abc"), &fast()).unwrap();
        let opened = open_fast(&blob, "abc");
        assert_eq!(opened.into_plaintext().unwrap().as_str(), "");
    }

    #[test]
    fn test_unicode_round_trip() {
        let text = "let s = \"snowman ☃ and emoji 🔒\";\n";
        let blob = seal_with_params(text, &Password::from("pässwörd"), &fast()).unwrap();
        let opened = open_fast(&blob, "pässwörd");
        assert_eq!(opened.into_plaintext().unwrap().as_str(), text);
    }

    #[test]
    fn test_wrong_key() {
        let blob = seal_with_params("secret", &Password::from("k1"), &fast()).unwrap();
        assert!(open_fast(&blob, "k2").is_wrong_key());
        assert!(open_fast(&blob, "K1").is_wrong_key());
        assert!(open_fast(&blob, "").is_wrong_key());
    }

    #[test]
    fn test_seal_is_not_deterministic() {
        let password = Password::from("k");
        let first = seal_with_params("same text", &password, &fast()).unwrap();
        let second = seal_with_params("same text", &password, &fast()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_password_rejected() {
        let err = seal_with_params("text", &Password::from(""), &fast())
            .expect_err("expected empty password rejection");
        assert_eq!(err.category, ErrorCategory::InvalidInput);
        assert_eq!(err.kind, Some(ErrorKind::EmptyPassword));
    }

    #[test]
    fn test_malformed_blobs_are_wrong_key() {
        for blob in [
            "",
            "plain text body",
            "snipvault1:",
            "snipvault1:$$$",
            "snipvault2:AAAA",
            "snipvault1:AAAAAAAAAAAAAAAA",
        ] {
            assert!(open_fast(blob, "k").is_wrong_key(), "blob {:?}", blob);
        }
    }

    #[test]
    fn test_single_byte_tamper_in_body() {
        let password = Password::from("k");
        let blob = seal_with_params("tamper me", &password, &fast()).unwrap();
        let (_, body) = varmor::unwrap(&blob).unwrap();

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            let tampered = varmor::wrap(&tampered);
            assert!(
                open_fast(&tampered, "k").is_wrong_key(),
                "flip at byte {} was not detected",
                i
            );
        }
        assert!(!open_fast(&blob, "k").is_wrong_key());
    }

    #[test]
    fn test_single_char_tamper_in_armor() {
        let blob = seal_with_params("tamper me", &Password::from("k"), &fast()).unwrap();

        for i in 0..blob.len() {
            let mut chars: Vec<char> = blob.chars().collect();
            chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
            let tampered: String = chars.into_iter().collect();
            assert!(
                open_fast(&tampered, "k").is_wrong_key(),
                "change at char {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_opened_debug_is_redacted() {
        let blob = seal_with_params("top secret", &Password::from("k"), &fast()).unwrap();
        let opened = open_fast(&blob, "k");
        assert!(!format!("{:?}", opened).contains("top secret"));
    }
}
