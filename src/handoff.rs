//! Read-once handoff of a password between views
//!
//! The list view deposits `(snippet id, password)` when the user asks to open
//! a protected snippet; the editor view takes it exactly once on arrival. A
//! reload or a second arrival finds the slot empty and falls back to the
//! locked view.

use crate::error::{ErrorKind, Result, VaultError};
use crate::password::Password;
use crate::store::{Credential, SnippetId, SnippetStore, SnippetSummary};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub struct HandoffTicket {
    snippet_id: SnippetId,
    password: Password,
}

impl HandoffTicket {
    pub fn snippet_id(&self) -> SnippetId {
        self.snippet_id
    }

    pub fn into_parts(self) -> (SnippetId, Password) {
        (self.snippet_id, self.password)
    }
}

impl fmt::Debug for HandoffTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffTicket")
            .field("snippet_id", &self.snippet_id)
            .field("password", &self.password)
            .finish()
    }
}

/// Browsing-session scoped slot holding at most one ticket.
///
/// Clones are handles to the same slot. Whatever is left in it is zeroized
/// when the last handle drops.
#[derive(Debug, Clone, Default)]
pub struct HandoffSlot {
    inner: Arc<Mutex<Option<HandoffTicket>>>,
}

impl HandoffSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<HandoffTicket>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a ticket, replacing (and zeroizing) any unclaimed one.
    pub fn deposit(&self, snippet_id: SnippetId, password: Password) {
        debug!(snippet = %snippet_id, "handoff deposited");
        *self.lock() = Some(HandoffTicket {
            snippet_id,
            password,
        });
    }

    /// Remove and return the ticket. The slot is empty afterwards.
    pub fn take(&self) -> Option<HandoffTicket> {
        let ticket = self.lock().take();
        if let Some(ticket) = &ticket {
            debug!(snippet = %ticket.snippet_id, "handoff taken");
        }
        ticket
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

/// The snippet list, the sending side of the handoff
#[derive(Debug, Clone)]
pub struct ListView {
    slot: HandoffSlot,
}

impl ListView {
    pub fn new(slot: HandoffSlot) -> Self {
        Self { slot }
    }

    pub fn entries<S: SnippetStore>(
        &self,
        store: &S,
        credential: &Credential,
    ) -> Result<Vec<SnippetSummary>> {
        store.list(credential)
    }

    /// Ask the editor view to open a protected snippet with `password`.
    pub fn request_open(&self, snippet: &SnippetSummary, password: Password) -> Result<()> {
        if password.is_empty() {
            return Err(VaultError::invalid_input(
                ErrorKind::EmptyPassword,
                "password is required",
            ));
        }
        self.slot.deposit(snippet.id, password);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_take_is_read_once() {
        let slot = HandoffSlot::new();
        let id = Uuid::new_v4();
        slot.deposit(id, Password::from("pw"));

        let (taken_id, password) = slot.take().unwrap().into_parts();
        assert_eq!(taken_id, id);
        assert!(password.matches(&Password::from("pw")));

        // A reload sees nothing.
        assert!(slot.take().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn test_handles_share_the_slot() {
        let list_view = HandoffSlot::new();
        let editor_view = list_view.clone();
        let id = Uuid::new_v4();

        list_view.deposit(id, Password::from("pw"));
        assert_eq!(editor_view.take().unwrap().snippet_id(), id);
        assert!(list_view.is_empty());
    }

    #[test]
    fn test_deposit_replaces_unclaimed_ticket() {
        let slot = HandoffSlot::new();
        let second = Uuid::new_v4();
        slot.deposit(Uuid::new_v4(), Password::from("old"));
        slot.deposit(second, Password::from("new"));

        let (id, password) = slot.take().unwrap().into_parts();
        assert_eq!(id, second);
        assert!(password.matches(&Password::from("new")));
    }

    #[test]
    fn test_clear() {
        let slot = HandoffSlot::new();
        slot.deposit(Uuid::new_v4(), Password::from("pw"));
        slot.clear();
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_list_view_rejects_empty_password() {
        let slot = HandoffSlot::new();
        let list_view = ListView::new(slot.clone());
        let summary = SnippetSummary {
            id: Uuid::new_v4(),
            name: "s".to_string(),
            language: "text".to_string(),
            protected: true,
            updated_at: chrono::Utc::now(),
        };

        let err = list_view
            .request_open(&summary, Password::from(""))
            .expect_err("expected empty password rejection");
        assert_eq!(err.kind, Some(ErrorKind::EmptyPassword));
        assert!(slot.is_empty());

        list_view.request_open(&summary, Password::from("pw")).unwrap();
        assert_eq!(slot.take().unwrap().snippet_id(), summary.id);
    }

    #[test]
    fn test_debug_hides_password() {
        let slot = HandoffSlot::new();
        slot.deposit(Uuid::new_v4(), Password::from("hunter2"));
        assert!(!format!("{:?}", slot).contains("hunter2"));
    }
}
