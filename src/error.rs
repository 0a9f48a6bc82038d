use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// The user supplied something unusable (empty password, mismatched
    /// confirmation, bad name) or asked for something the current state
    /// does not allow. Recover locally and re-prompt.
    InvalidInput,

    /// A protected body could not be opened with the supplied password.
    ///
    /// Corrupted and tampered-with blobs land here too; the two are never
    /// distinguished.
    WrongKey,

    /// Entropy or a cryptographic primitive was unavailable. The operation
    /// is aborted and nothing is written.
    EngineFault,

    /// The snippet store failed. Controller state and editor text are left
    /// as they were.
    PersistenceFault,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A password was required but empty.
    EmptyPassword,
    /// Password and confirmation differ.
    PasswordMismatch,
    /// Snippet name is empty or too long.
    InvalidName,
    /// Nothing to save.
    EmptySnippet,
    /// Re-seal requested without an unlocked session for the current snippet.
    NoActiveSession,
    /// Unlock requested while no protected snippet is waiting to be opened.
    NothingLocked,
    /// Save requested over a protected snippet that has not been unlocked.
    SnippetLocked,
    /// scrypt parameters below the floor for new seals.
    WeakKdf,
    /// Another save/open for the same snippet is still running.
    OperationInFlight,
    /// The armored representation is malformed (prefix, encoding, or unsupported version).
    ArmoringInvalid,
    /// Base64 decoding of the armored payload failed.
    ArmoringDecode,
    /// Input claimed to be snipvault but used a future/unsupported version.
    ArmoringFromFuture,
    /// Length fields, KDF parameters or binary layout are invalid.
    BinaryFormat,
    /// Input data ended before the expected component could be read.
    TruncatedInput,
    /// Additional bytes were present after the sealed payload.
    TrailingData,
    /// Authentication failed due to an incorrect password or tampering
    /// or corruption.
    AuthenticationFailed,
    /// Password could not be obtained from the configured prompt.
    PasswordUnavailable,
    /// The operating system entropy source failed.
    EntropyUnavailable,
    /// Low-level scrypt key derivation failed.
    ScryptFailure,
    /// NaCl secretbox (XSalsa20Poly1305) failed to seal data.
    SecretboxFailure,
    /// The credential is not known to the store.
    Unauthorized,
    /// No snippet with the requested id.
    NotFound,
    /// A snippet with the same name already exists.
    Conflict,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
    /// Stored records could not be (de)serialized.
    Serialization,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct VaultError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag. Any code consuming errors MUST
    /// handle the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl VaultError {
    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    pub fn invalid_input(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::InvalidInput, kind, msg)
    }

    /// The single user-facing wrong-password error.
    pub fn wrong_key() -> Self {
        Self::with_kind(
            ErrorCategory::WrongKey,
            ErrorKind::AuthenticationFailed,
            "wrong password",
        )
    }

    pub fn persistence(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::PersistenceFault, kind, msg)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn is_wrong_key(&self) -> bool {
        self.category == ErrorCategory::WrongKey
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_category_and_kind() {
        let err = VaultError::invalid_input(ErrorKind::PasswordMismatch, "passwords do not match")
            .with_context("save failed");
        assert_eq!(err.category, ErrorCategory::InvalidInput);
        assert_eq!(err.kind, Some(ErrorKind::PasswordMismatch));
        assert_eq!(err.message(), "save failed");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("passwords do not match".to_string())
        );
    }

    #[test]
    fn test_wrong_key_message_is_fixed() {
        let err = VaultError::wrong_key();
        assert!(err.is_wrong_key());
        assert_eq!(err.to_string(), "wrong password");
    }
}
