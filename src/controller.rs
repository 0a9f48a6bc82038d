//! Secret lifecycle controller
//!
//! Decides when text is sealed and opened, and keeps the password only while
//! a protected snippet is shown decrypted. The controller state is one of:
//!
//! - draft: nothing selected, the editor holds new text
//! - plain: an unprotected snippet is loaded
//! - locked: a protected snippet is selected, the editor is empty
//! - unlocked: a protected snippet is decrypted into the editor, and a
//!   [`DecryptionSession`] holds its password for re-sealing
//!
//! Leaving the unlocked state by any path tears the session down.

use crate::editor::Editor;
use crate::engine::{self, Opened};
use crate::error::{ErrorKind, Result, VaultError};
use crate::handoff::HandoffSlot;
use crate::inflight::{CancelToken, InFlight};
use crate::password::{Password, PasswordPrompt};
use crate::secretcrypt::KdfParams;
use crate::session::{DecryptionSession, TeardownReason};
use crate::store::{
    self, Credential, DEFAULT_LANGUAGE, NewSnippet, SnippetId, SnippetRecord, SnippetStore,
    SnippetSummary, SnippetUpdate,
};
use tracing::{debug, info, warn};

/// Yes/no gate for overwrites, discarding unsaved changes and deletes.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, question: &str) -> bool {
        self(question)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&mut self, _question: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm(&mut self, _question: &str) -> bool {
        false
    }
}

#[derive(Debug)]
pub enum Protection {
    None,
    /// Seal the snippet; both values must be non-empty and equal.
    Password {
        password: Password,
        confirmation: Password,
    },
}

#[derive(Debug)]
pub struct SaveRequest {
    pub name: String,
    /// Keeps the stored language on update, defaults to `text` on create.
    pub language: Option<String>,
    pub protection: Protection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { id: SnippetId, protected: bool },
    /// The user declined to overwrite an existing snippet.
    Declined,
    /// Cancelled before anything was persisted.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Loaded(SnippetId),
    Locked(SnippetId),
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    Unlocked(SnippetId),
    WrongKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Loaded(SnippetId),
    Unlocked(SnippetId),
    /// The prompt gave up; the snippet stays locked.
    Cancelled,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Nothing was waiting, e.g. after a reload.
    Empty,
    Loaded(SnippetId),
    Unlocked(SnippetId),
    /// The handed-over password did not open the snippet; it stays locked.
    WrongKey(SnippetId),
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Draft,
    Plain(SnippetId),
    Locked(SnippetId),
    Unlocked(SnippetId),
}

pub struct Controller<S, E> {
    store: S,
    editor: E,
    credential: Credential,
    kdf: KdfParams,
    in_flight: InFlight,
    cancel: CancelToken,
    current: Option<SnippetId>,
    unsaved: bool,
    /// Protected record selected but not yet opened.
    locked: Option<SnippetRecord>,
    session: Option<DecryptionSession>,
}

impl<S, E> Controller<S, E> {
    /// Drop the decryption session, if any. The password is zeroized.
    ///
    /// Callers reset the editor and view themselves.
    pub(crate) fn teardown(&mut self, reason: TeardownReason) {
        if let Some(session) = self.session.take() {
            info!(snippet = %session.snippet_id(), ?reason, "decryption session closed");
        }
    }

    pub fn view(&self) -> View {
        match (self.current, &self.locked, &self.session) {
            (None, _, _) => View::Draft,
            (Some(id), Some(_), _) => View::Locked(id),
            (Some(id), None, Some(session)) if session.is_for(id) => View::Unlocked(id),
            (Some(id), None, _) => View::Plain(id),
        }
    }

    pub fn session(&self) -> Option<&DecryptionSession> {
        self.session.as_ref()
    }

    pub fn current_id(&self) -> Option<SnippetId> {
        self.current
    }

    /// Record that the editor text changed since the last load or save.
    pub fn mark_edited(&mut self) {
        self.unsaved = true;
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    /// Gives access to the editor for typing. Does not mark changes; call
    /// [`Controller::mark_edited`] for that.
    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    /// Handle for cancelling a running save or re-seal from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<S, E> Drop for Controller<S, E> {
    fn drop(&mut self) {
        self.teardown(TeardownReason::Dropped);
    }
}

impl<S: SnippetStore, E: Editor> Controller<S, E> {
    pub fn new(store: S, editor: E, credential: Credential) -> Self {
        Self {
            store,
            editor,
            credential,
            kdf: KdfParams::DEFAULT,
            in_flight: InFlight::new(),
            cancel: CancelToken::new(),
            current: None,
            unsaved: false,
            locked: None,
            session: None,
        }
    }

    /// scrypt cost for new seals and for rejecting malformed blobs.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Share an in-flight registry with other controllers.
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn list(&self) -> Result<Vec<SnippetSummary>> {
        self.store.list(&self.credential)
    }

    /// Find a snippet by name, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Result<Option<SnippetSummary>> {
        let wanted = name.trim().to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .find(|summary| summary.name.to_lowercase() == wanted))
    }

    fn confirm_discard(&self, confirm: &mut dyn Confirm) -> bool {
        !self.unsaved || confirm.confirm("You have unsaved changes. Discard them?")
    }

    fn reset_view(&mut self, reason: TeardownReason) -> Result<()> {
        self.teardown(reason);
        self.locked = None;
        self.current = None;
        self.unsaved = false;
        self.editor.clear()
    }

    /// Save the editor text under `request.name`.
    ///
    /// With [`Protection::Password`] the text is sealed first and the
    /// snippet ends up locked with an empty editor. Password checks happen
    /// before any store call. A locked snippet cannot be saved over; unlock
    /// it or start a new snippet first.
    pub fn save(&mut self, request: SaveRequest, confirm: &mut dyn Confirm) -> Result<SaveOutcome> {
        let SaveRequest {
            name,
            language,
            protection,
        } = request;
        let name = store::normalize_name(&name)?;
        if let Some(record) = &self.locked {
            warn!(snippet = %record.id, "save refused while snippet is locked");
            return Err(VaultError::invalid_input(
                ErrorKind::SnippetLocked,
                "unlock the protected snippet before saving over it",
            ));
        }

        let password = match protection {
            Protection::None => None,
            Protection::Password {
                password,
                confirmation,
            } => {
                if password.is_empty() || confirmation.is_empty() {
                    return Err(VaultError::invalid_input(
                        ErrorKind::EmptyPassword,
                        "password and confirmation are required to protect a snippet",
                    ));
                }
                if !password.matches(&confirmation) {
                    return Err(VaultError::invalid_input(
                        ErrorKind::PasswordMismatch,
                        "passwords do not match",
                    ));
                }
                Some(password)
            }
        };
        let protected = password.is_some();

        self.cancel.reset();
        let text = self.editor.get_text()?;
        if text.trim().is_empty() {
            return Err(VaultError::invalid_input(
                ErrorKind::EmptySnippet,
                "nothing to save; write something first",
            ));
        }

        let target = match self.current {
            Some(id) => Some(id),
            None => match self.find_by_name(&name)? {
                Some(existing) => {
                    let question = format!(
                        "A snippet named \"{}\" already exists. Overwrite it?",
                        existing.name
                    );
                    if !confirm.confirm(&question) {
                        info!(name = %name, "overwrite declined");
                        return Ok(SaveOutcome::Declined);
                    }
                    Some(existing.id)
                }
                None => None,
            },
        };
        let _guard = target.map(|id| self.in_flight.begin(id)).transpose()?;

        let body = match &password {
            Some(password) => engine::seal_with_params(&text, password, &self.kdf)?,
            None => text.to_string(),
        };
        drop(password);
        drop(text);

        if self.cancel.is_cancelled() {
            self.cancel.reset();
            info!(name = %name, "save cancelled before persisting");
            return Ok(SaveOutcome::Cancelled);
        }

        let result = match target {
            Some(id) => self.store.update(
                &self.credential,
                id,
                SnippetUpdate {
                    name: Some(name),
                    body: Some(body),
                    language,
                    protected: Some(protected),
                },
            ),
            None => self.store.create(
                &self.credential,
                NewSnippet {
                    name,
                    body,
                    language: language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                    protected,
                },
            ),
        };
        let record = result.map_err(|e| e.with_context("failed to save snippet"))?;
        let id = record.id;

        self.teardown(TeardownReason::Saved);
        self.current = Some(id);
        self.unsaved = false;
        if protected {
            self.locked = Some(record);
            self.editor.clear()?;
        } else {
            self.locked = None;
        }
        info!(snippet = %id, protected, "snippet saved");
        Ok(SaveOutcome::Saved { id, protected })
    }

    /// Load snippet `id`. A protected one is left locked; the editor is
    /// cleared rather than shown ciphertext.
    pub fn select(&mut self, id: SnippetId, confirm: &mut dyn Confirm) -> Result<Selection> {
        if !self.confirm_discard(confirm) {
            return Ok(Selection::Declined);
        }
        let _guard = self.in_flight.begin(id)?;
        let record = self
            .store
            .get(&self.credential, id)
            .map_err(|e| e.with_context("failed to load snippet"))?;

        self.teardown(TeardownReason::OpenedOther);
        self.locked = None;
        self.current = None;
        self.unsaved = false;

        if record.protected {
            self.editor.clear()?;
            self.current = Some(id);
            self.locked = Some(record);
            debug!(snippet = %id, "protected snippet selected");
            Ok(Selection::Locked(id))
        } else {
            self.editor.set_text(&record.body)?;
            self.current = Some(id);
            debug!(snippet = %id, "snippet loaded");
            Ok(Selection::Loaded(id))
        }
    }

    /// Try one password against the locked snippet.
    ///
    /// On [`Unlock::WrongKey`] the password is dropped and the snippet stays
    /// locked, so the caller can prompt again.
    pub fn unlock(&mut self, password: Password) -> Result<Unlock> {
        let Some(record) = &self.locked else {
            return Err(VaultError::invalid_input(
                ErrorKind::NothingLocked,
                "no protected snippet is waiting to be opened",
            ));
        };
        if password.is_empty() {
            return Err(VaultError::invalid_input(
                ErrorKind::EmptyPassword,
                "password is required",
            ));
        }
        let id = record.id;
        let _guard = self.in_flight.begin(id)?;

        match engine::open_with_params(&record.body, &password, &self.kdf)? {
            Opened::WrongKey => {
                warn!(snippet = %id, "wrong password");
                Ok(Unlock::WrongKey)
            }
            Opened::Plaintext(text) => {
                self.editor.set_text(&text)?;
                self.locked = None;
                self.unsaved = false;
                self.session = Some(DecryptionSession::new(id, password));
                info!(snippet = %id, "snippet unlocked");
                Ok(Unlock::Unlocked(id))
            }
        }
    }

    /// Select `id` and, if it is protected, prompt until it opens or the
    /// prompt gives up. Each password is tried once.
    pub fn open_with_prompt(
        &mut self,
        id: SnippetId,
        prompt: &mut dyn PasswordPrompt,
        confirm: &mut dyn Confirm,
    ) -> Result<OpenOutcome> {
        match self.select(id, confirm)? {
            Selection::Declined => return Ok(OpenOutcome::Declined),
            Selection::Loaded(id) => return Ok(OpenOutcome::Loaded(id)),
            Selection::Locked(_) => {}
        }

        let mut label = "Password";
        loop {
            let password = match prompt.prompt(label)? {
                Some(password) if !password.is_empty() => password,
                _ => {
                    debug!(snippet = %id, "password prompt cancelled");
                    return Ok(OpenOutcome::Cancelled);
                }
            };
            match self.unlock(password)? {
                Unlock::Unlocked(id) => return Ok(OpenOutcome::Unlocked(id)),
                Unlock::WrongKey => label = "Wrong password. Password",
            }
        }
    }

    /// Seal the editor text with the session password and store it.
    ///
    /// Afterwards the session is gone and the snippet is locked again. If
    /// the store fails, the session and editor text are kept for a retry.
    pub fn reseal(&mut self) -> Result<SaveOutcome> {
        let current = self.current;
        let Some(session) = self
            .session
            .as_ref()
            .filter(|session| Some(session.snippet_id()) == current)
        else {
            return Err(VaultError::invalid_input(
                ErrorKind::NoActiveSession,
                "snippet is not unlocked; open it with its password first",
            ));
        };
        let id = session.snippet_id();
        let _guard = self.in_flight.begin(id)?;

        self.cancel.reset();
        let text = self.editor.get_text()?;
        let blob = engine::seal_with_params(&text, session.password(), &self.kdf)?;
        drop(text);

        if self.cancel.is_cancelled() {
            self.cancel.reset();
            info!(snippet = %id, "re-seal cancelled before persisting");
            return Ok(SaveOutcome::Cancelled);
        }

        let record = self
            .store
            .update(
                &self.credential,
                id,
                SnippetUpdate {
                    body: Some(blob),
                    protected: Some(true),
                    ..Default::default()
                },
            )
            .map_err(|e| e.with_context("failed to re-seal snippet"))?;

        self.teardown(TeardownReason::Resealed);
        self.locked = Some(record);
        self.unsaved = false;
        self.editor.clear()?;
        info!(snippet = %id, "snippet re-sealed");
        Ok(SaveOutcome::Saved { id, protected: true })
    }

    /// Start a fresh draft. Returns `false` if the user kept unsaved changes.
    pub fn new_snippet(&mut self, confirm: &mut dyn Confirm) -> Result<bool> {
        if !self.confirm_discard(confirm) {
            return Ok(false);
        }
        self.reset_view(TeardownReason::NewSnippet)?;
        Ok(true)
    }

    /// Leave the editing view. Returns `false` if the user kept unsaved changes.
    pub fn navigate_away(&mut self, confirm: &mut dyn Confirm) -> Result<bool> {
        if !self.confirm_discard(confirm) {
            return Ok(false);
        }
        self.reset_view(TeardownReason::NavigatedAway)?;
        Ok(true)
    }

    pub fn delete(&mut self, id: SnippetId, confirm: &mut dyn Confirm) -> Result<bool> {
        if !confirm.confirm("Delete this snippet? This cannot be undone.") {
            return Ok(false);
        }
        let _guard = self.in_flight.begin(id)?;
        self.store
            .delete(&self.credential, id)
            .map_err(|e| e.with_context("failed to delete snippet"))?;
        if self.current == Some(id) {
            self.reset_view(TeardownReason::Deleted)?;
        }
        info!(snippet = %id, "snippet deleted");
        Ok(true)
    }

    /// Consume the handoff left by the list view, if any.
    ///
    /// The ticket leaves the slot before anything else happens, so a reload
    /// finds it empty whatever the outcome here.
    pub fn receive_handoff(
        &mut self,
        slot: &HandoffSlot,
        confirm: &mut dyn Confirm,
    ) -> Result<HandoffOutcome> {
        let Some(ticket) = slot.take() else {
            debug!("no handoff waiting");
            return Ok(HandoffOutcome::Empty);
        };
        let (id, password) = ticket.into_parts();

        match self.select(id, confirm)? {
            Selection::Declined => Ok(HandoffOutcome::Declined),
            Selection::Loaded(id) => Ok(HandoffOutcome::Loaded(id)),
            Selection::Locked(id) => match self.unlock(password)? {
                Unlock::Unlocked(id) => Ok(HandoffOutcome::Unlocked(id)),
                Unlock::WrongKey => Ok(HandoffOutcome::WrongKey(id)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::BufferEditor;
    use crate::store::MemoryStore;

    fn fast() -> KdfParams {
        KdfParams::new(4, 8, 1).unwrap()
    }

    fn controller() -> Controller<MemoryStore, BufferEditor> {
        let store = MemoryStore::new().with_account("token", "me");
        Controller::new(store, BufferEditor::new(), Credential::new("token")).with_kdf(fast())
    }

    fn protect(password: &str) -> Protection {
        Protection::Password {
            password: Password::from(password),
            confirmation: Password::from(password),
        }
    }

    fn save_as(
        controller: &mut Controller<MemoryStore, BufferEditor>,
        name: &str,
        protection: Protection,
    ) -> SaveOutcome {
        controller
            .save(
                SaveRequest {
                    name: name.to_string(),
                    language: None,
                    protection,
                },
                &mut NeverConfirm,
            )
            .unwrap()
    }

    #[test]
    fn test_plain_save_and_select() {
        let mut c = controller();
        c.editor_mut().set_text("console.log(1)").unwrap();
        let SaveOutcome::Saved { id, protected } = save_as(&mut c, "demo", Protection::None) else {
            panic!("expected saved");
        };
        assert!(!protected);
        assert_eq!(c.view(), View::Plain(id));
        assert_eq!(c.editor().text(), "console.log(1)");

        assert!(c.new_snippet(&mut NeverConfirm).unwrap());
        assert_eq!(c.view(), View::Draft);
        assert_eq!(c.select(id, &mut NeverConfirm).unwrap(), Selection::Loaded(id));
        assert_eq!(c.editor().text(), "console.log(1)");
    }

    #[test]
    fn test_protected_save_locks_and_unlock_opens() {
        let mut c = controller();
        c.editor_mut().set_text("secret code").unwrap();
        let SaveOutcome::Saved { id, .. } = save_as(&mut c, "vault", protect("pw")) else {
            panic!("expected saved");
        };
        assert_eq!(c.view(), View::Locked(id));
        assert_eq!(c.editor().text(), "");
        assert!(c.session().is_none());

        assert_eq!(c.unlock(Password::from("nope")).unwrap(), Unlock::WrongKey);
        assert_eq!(c.view(), View::Locked(id));

        assert_eq!(c.unlock(Password::from("pw")).unwrap(), Unlock::Unlocked(id));
        assert_eq!(c.view(), View::Unlocked(id));
        assert_eq!(c.editor().text(), "secret code");
    }

    #[test]
    fn test_unlock_without_locked_snippet() {
        let mut c = controller();
        let err = c.unlock(Password::from("pw")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NothingLocked));
    }

    #[test]
    fn test_reseal_requires_session() {
        let mut c = controller();
        let err = c.reseal().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NoActiveSession));
    }

    #[test]
    fn test_empty_editor_is_not_saved() {
        let mut c = controller();
        c.editor_mut().set_text("   \n").unwrap();
        let err = c
            .save(
                SaveRequest {
                    name: "blank".to_string(),
                    language: None,
                    protection: Protection::None,
                },
                &mut NeverConfirm,
            )
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::EmptySnippet));
    }

    #[test]
    fn test_unsaved_changes_gate_new_snippet() {
        let mut c = controller();
        c.editor_mut().set_text("draft").unwrap();
        c.mark_edited();

        assert!(!c.new_snippet(&mut NeverConfirm).unwrap());
        assert_eq!(c.editor().text(), "draft");
        assert!(c.has_unsaved_changes());

        let mut asked = Vec::new();
        let mut confirm = |q: &str| {
            asked.push(q.to_string());
            true
        };
        assert!(c.new_snippet(&mut confirm).unwrap());
        assert_eq!(asked.len(), 1);
        assert_eq!(c.editor().text(), "");
        assert!(!c.has_unsaved_changes());
    }

    #[test]
    fn test_delete_current_resets_view() {
        let mut c = controller();
        c.editor_mut().set_text("bye").unwrap();
        let SaveOutcome::Saved { id, .. } = save_as(&mut c, "gone", Protection::None) else {
            panic!("expected saved");
        };

        assert!(!c.delete(id, &mut NeverConfirm).unwrap());
        assert_eq!(c.list().unwrap().len(), 1);

        assert!(c.delete(id, &mut AlwaysConfirm).unwrap());
        assert!(c.list().unwrap().is_empty());
        assert_eq!(c.view(), View::Draft);
        assert_eq!(c.editor().text(), "");
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let mut c = controller();
        c.editor_mut().set_text("x").unwrap();
        save_as(&mut c, "Deploy Script", Protection::None);
        assert!(c.find_by_name("deploy script").unwrap().is_some());
        assert!(c.find_by_name("other").unwrap().is_none());
    }
}
