//! Decryption sessions
//!
//! A session exists only while a protected snippet is shown decrypted. It
//! holds the password that opened the snippet so a re-seal can reuse it, and
//! nothing else outlives it.

use crate::password::Password;
use crate::store::SnippetId;
use std::fmt;
use std::time::{Duration, Instant};

/// Why a session ended; recorded in the teardown log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Resealed,
    Saved,
    OpenedOther,
    NewSnippet,
    NavigatedAway,
    Deleted,
    Dropped,
}

pub struct DecryptionSession {
    snippet_id: SnippetId,
    password: Password,
    unlocked_at: Instant,
}

impl DecryptionSession {
    pub(crate) fn new(snippet_id: SnippetId, password: Password) -> Self {
        Self {
            snippet_id,
            password,
            unlocked_at: Instant::now(),
        }
    }

    pub fn snippet_id(&self) -> SnippetId {
        self.snippet_id
    }

    pub fn is_for(&self, id: SnippetId) -> bool {
        self.snippet_id == id
    }

    pub fn age(&self) -> Duration {
        self.unlocked_at.elapsed()
    }

    pub(crate) fn password(&self) -> &Password {
        &self.password
    }
}

// The password is zeroized when the session drops.
impl fmt::Debug for DecryptionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionSession")
            .field("snippet_id", &self.snippet_id)
            .field("password", &self.password)
            .field("age", &self.age())
            .finish()
    }
}
