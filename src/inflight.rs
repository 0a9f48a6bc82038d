//! Re-entrancy guard and cancellation for save/open operations

use crate::error::{ErrorKind, Result, VaultError};
use crate::store::SnippetId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Snippet ids with a save or open currently running
///
/// Clones share the same registry, so several controllers (or a controller
/// and a UI thread) can see each other's operations.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<SnippetId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SnippetId>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `id` busy until the returned guard drops.
    pub fn begin(&self, id: SnippetId) -> Result<InFlightGuard> {
        if !self.lock().insert(id) {
            debug!(snippet = %id, "rejected re-entrant operation");
            return Err(VaultError::invalid_input(
                ErrorKind::OperationInFlight,
                "another operation on this snippet is still in progress",
            ));
        }
        Ok(InFlightGuard {
            registry: self.clone(),
            id,
        })
    }

    pub fn is_busy(&self, id: SnippetId) -> bool {
        self.lock().contains(&id)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlight,
    id: SnippetId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// Cancellation flag checked before a sealed result is persisted
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_second_begin_is_rejected() {
        let registry = InFlight::new();
        let id = Uuid::new_v4();

        let guard = registry.begin(id).unwrap();
        let err = registry.begin(id).expect_err("expected in-flight rejection");
        assert_eq!(err.kind, Some(ErrorKind::OperationInFlight));

        // Other ids are independent.
        let _other = registry.begin(Uuid::new_v4()).unwrap();

        drop(guard);
        assert!(!registry.is_busy(id));
        registry.begin(id).unwrap();
    }

    #[test]
    fn test_clones_share_state() {
        let registry = InFlight::new();
        let id = Uuid::new_v4();
        let _guard = registry.clone().begin(id).unwrap();
        assert!(registry.is_busy(id));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!handle.is_cancelled());
    }
}
