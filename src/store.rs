//! Snippet persistence
//!
//! A store keeps named snippet records per account and knows nothing about
//! encryption: when `protected` is set, `body` is an armored blob, and the
//! store passes it through untouched.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::file_ops;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

pub type SnippetId = Uuid;

/// Longest accepted snippet name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Language tag used when none is given.
pub const DEFAULT_LANGUAGE: &str = "text";

/// Opaque bearer credential attached to every store call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// The raw token, for store implementations that must present it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetRecord {
    pub id: SnippetId,
    pub name: String,
    /// Plain text, or an armored blob when `protected` is set.
    pub body: String,
    pub language: String,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SnippetRecord {
    pub fn summary(&self) -> SnippetSummary {
        SnippetSummary {
            id: self.id,
            name: self.name.clone(),
            language: self.language.clone(),
            protected: self.protected,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for SnippetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnippetRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("body_len", &self.body.len())
            .field("language", &self.language)
            .field("protected", &self.protected)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Listing entry; never carries the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetSummary {
    pub id: SnippetId,
    pub name: String,
    pub language: String,
    pub protected: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSnippet {
    pub name: String,
    pub body: String,
    pub language: String,
    pub protected: bool,
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct SnippetUpdate {
    pub name: Option<String>,
    pub body: Option<String>,
    pub language: Option<String>,
    pub protected: Option<bool>,
}

/// Persistence collaborator for snippet records.
pub trait SnippetStore {
    /// All snippets of the credential's account, most recently updated first.
    fn list(&self, credential: &Credential) -> Result<Vec<SnippetSummary>>;

    fn get(&self, credential: &Credential, id: SnippetId) -> Result<SnippetRecord>;

    /// Fails with [`ErrorKind::Conflict`] when the account already has a
    /// snippet with exactly this name.
    fn create(&mut self, credential: &Credential, snippet: NewSnippet) -> Result<SnippetRecord>;

    /// Replaces the record atomically: either every field of `update` is
    /// applied or the stored record is unchanged.
    fn update(
        &mut self,
        credential: &Credential,
        id: SnippetId,
        update: SnippetUpdate,
    ) -> Result<SnippetRecord>;

    fn delete(&mut self, credential: &Credential, id: SnippetId) -> Result<()>;
}

/// Trim and check a snippet name.
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::invalid_input(
            ErrorKind::InvalidName,
            "snippet name is required",
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(VaultError::invalid_input(
            ErrorKind::InvalidName,
            format!("snippet name longer than {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(name.to_string())
}

fn require_body(body: &str) -> Result<()> {
    if body.is_empty() {
        return Err(VaultError::invalid_input(
            ErrorKind::EmptySnippet,
            "snippet body is required",
        ));
    }
    Ok(())
}

fn not_found(id: SnippetId) -> VaultError {
    VaultError::persistence(ErrorKind::NotFound, format!("snippet {} not found", id))
}

fn conflict(name: &str) -> VaultError {
    VaultError::persistence(
        ErrorKind::Conflict,
        format!("snippet with name {:?} already exists", name),
    )
}

fn unauthorized() -> VaultError {
    VaultError::persistence(ErrorKind::Unauthorized, "credential not accepted")
}

fn build_record(snippet: NewSnippet) -> Result<SnippetRecord> {
    let name = normalize_name(&snippet.name)?;
    require_body(&snippet.body)?;
    let now = Utc::now();
    Ok(SnippetRecord {
        id: Uuid::new_v4(),
        name,
        body: snippet.body,
        language: snippet.language,
        protected: snippet.protected,
        created_at: now,
        updated_at: now,
    })
}

/// Apply `update` to a copy of `record`, so a validation failure leaves the
/// original untouched.
fn apply_update(record: &SnippetRecord, update: SnippetUpdate) -> Result<SnippetRecord> {
    let mut next = record.clone();
    if let Some(name) = update.name {
        next.name = normalize_name(&name)?;
    }
    if let Some(body) = update.body {
        require_body(&body)?;
        next.body = body;
    }
    if let Some(language) = update.language {
        next.language = language;
    }
    if let Some(protected) = update.protected {
        next.protected = protected;
    }
    next.updated_at = Utc::now();
    Ok(next)
}

fn sorted_summaries<'a>(records: impl Iterator<Item = &'a SnippetRecord>) -> Vec<SnippetSummary> {
    let mut summaries: Vec<SnippetSummary> = records.map(SnippetRecord::summary).collect();
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

struct OwnedRecord {
    owner: String,
    record: SnippetRecord,
}

/// In-process store with any number of accounts
#[derive(Default)]
pub struct MemoryStore {
    /// token -> account
    accounts: HashMap<String, String>,
    records: HashMap<SnippetId, OwnedRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, token: &str, account: &str) -> Self {
        self.add_account(token, account);
        self
    }

    pub fn add_account(&mut self, token: &str, account: &str) {
        self.accounts.insert(token.to_string(), account.to_string());
    }

    fn owner(&self, credential: &Credential) -> Result<String> {
        self.accounts
            .get(credential.expose())
            .cloned()
            .ok_or_else(unauthorized)
    }

    fn owned(&self, owner: &str, id: SnippetId) -> Result<&SnippetRecord> {
        self.records
            .get(&id)
            .filter(|owned| owned.owner == owner)
            .map(|owned| &owned.record)
            .ok_or_else(|| not_found(id))
    }

    fn name_taken(&self, owner: &str, name: &str, except: Option<SnippetId>) -> bool {
        self.records.values().any(|owned| {
            owned.owner == owner && owned.record.name == name && Some(owned.record.id) != except
        })
    }
}

impl SnippetStore for MemoryStore {
    fn list(&self, credential: &Credential) -> Result<Vec<SnippetSummary>> {
        let owner = self.owner(credential)?;
        Ok(sorted_summaries(
            self.records
                .values()
                .filter(|owned| owned.owner == owner)
                .map(|owned| &owned.record),
        ))
    }

    fn get(&self, credential: &Credential, id: SnippetId) -> Result<SnippetRecord> {
        let owner = self.owner(credential)?;
        self.owned(&owner, id).cloned()
    }

    fn create(&mut self, credential: &Credential, snippet: NewSnippet) -> Result<SnippetRecord> {
        let owner = self.owner(credential)?;
        let record = build_record(snippet)?;
        if self.name_taken(&owner, &record.name, None) {
            return Err(conflict(&record.name));
        }
        self.records.insert(
            record.id,
            OwnedRecord {
                owner,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    fn update(
        &mut self,
        credential: &Credential,
        id: SnippetId,
        update: SnippetUpdate,
    ) -> Result<SnippetRecord> {
        let owner = self.owner(credential)?;
        let next = apply_update(self.owned(&owner, id)?, update)?;
        if self.name_taken(&owner, &next.name, Some(id)) {
            return Err(conflict(&next.name));
        }
        self.records.insert(
            id,
            OwnedRecord {
                owner,
                record: next.clone(),
            },
        );
        Ok(next)
    }

    fn delete(&mut self, credential: &Credential, id: SnippetId) -> Result<()> {
        let owner = self.owner(credential)?;
        self.owned(&owner, id)?;
        self.records.remove(&id);
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    snippets: Vec<SnippetRecord>,
}

const DOCUMENT_VERSION: u32 = 1;

/// Single-owner store kept in one JSON document
///
/// Every mutation rewrites the whole document atomically (tempfile, fsync,
/// rename), so a failed or interrupted write leaves the previous document in
/// place.
pub struct FileStore {
    path: PathBuf,
    owner: Credential,
    snippets: Vec<SnippetRecord>,
}

impl FileStore {
    /// Open the document at `path`, or start an empty one if it does not exist.
    pub fn open(path: &Path, owner: Credential) -> Result<Self> {
        let snippets = match fs::read(path) {
            Ok(bytes) => {
                let document: StoreDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    VaultError::with_kind_and_source(
                        ErrorCategory::PersistenceFault,
                        ErrorKind::Serialization,
                        format!("failed to parse {}", path.display()),
                        e,
                    )
                })?;
                if document.version != DOCUMENT_VERSION {
                    return Err(VaultError::persistence(
                        ErrorKind::Serialization,
                        format!(
                            "unsupported store document version {} in {}",
                            document.version,
                            path.display()
                        ),
                    ));
                }
                document.snippets
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(file_ops::read_error(path, e)),
        };
        debug!(path = %path.display(), count = snippets.len(), "opened snippet store");

        Ok(Self {
            path: path.to_path_buf(),
            owner,
            snippets,
        })
    }

    fn authorize(&self, credential: &Credential) -> Result<()> {
        if *credential != self.owner {
            return Err(unauthorized());
        }
        Ok(())
    }

    fn position(&self, id: SnippetId) -> Result<usize> {
        self.snippets
            .iter()
            .position(|record| record.id == id)
            .ok_or_else(|| not_found(id))
    }

    /// Persist `snippets` and adopt it only once it is on disk.
    fn commit(&mut self, snippets: Vec<SnippetRecord>) -> Result<()> {
        let document = StoreDocument {
            version: DOCUMENT_VERSION,
            snippets,
        };
        let json = serde_json::to_vec_pretty(&document).map_err(|e| {
            VaultError::with_kind_and_source(
                ErrorCategory::PersistenceFault,
                ErrorKind::Serialization,
                "failed to serialize snippet store",
                e,
            )
        })?;
        file_ops::write_atomic(&self.path, &json)?;
        self.snippets = document.snippets;
        Ok(())
    }
}

impl SnippetStore for FileStore {
    fn list(&self, credential: &Credential) -> Result<Vec<SnippetSummary>> {
        self.authorize(credential)?;
        Ok(sorted_summaries(self.snippets.iter()))
    }

    fn get(&self, credential: &Credential, id: SnippetId) -> Result<SnippetRecord> {
        self.authorize(credential)?;
        Ok(self.snippets[self.position(id)?].clone())
    }

    fn create(&mut self, credential: &Credential, snippet: NewSnippet) -> Result<SnippetRecord> {
        self.authorize(credential)?;
        let record = build_record(snippet)?;
        if self.snippets.iter().any(|r| r.name == record.name) {
            return Err(conflict(&record.name));
        }
        let mut next = self.snippets.clone();
        next.push(record.clone());
        self.commit(next)?;
        Ok(record)
    }

    fn update(
        &mut self,
        credential: &Credential,
        id: SnippetId,
        update: SnippetUpdate,
    ) -> Result<SnippetRecord> {
        self.authorize(credential)?;
        let index = self.position(id)?;
        let record = apply_update(&self.snippets[index], update)?;
        if self
            .snippets
            .iter()
            .any(|r| r.id != id && r.name == record.name)
        {
            return Err(conflict(&record.name));
        }
        let mut next = self.snippets.clone();
        next[index] = record.clone();
        self.commit(next)?;
        Ok(record)
    }

    fn delete(&mut self, credential: &Credential, id: SnippetId) -> Result<()> {
        self.authorize(credential)?;
        let index = self.position(id)?;
        let mut next = self.snippets.clone();
        next.remove(index);
        self.commit(next)
    }
}
