//! In-memory document store.
//!
//! Reference [`DocumentStore`] used by tests and local development. Data
//! lives in named collections of [`Document`]s; every read works on a
//! snapshot taken under a read lock, so concurrent find/count calls never
//! block each other.

use crate::eval::{self, Matcher};
use crate::store::{DocumentStore, FindOptions, HexIdCodec, IdCodec, Session};
use ::async_trait::async_trait;
use quarry_core::{
    document_from_json, Document, DocumentId, FieldValue, FilterExpr, PipelineStage, QuarryError,
    QuarryResult, QueryConfig, StorageError,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Ended,
}

/// In-memory store for tests and local development.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionState>>>,
    text_search_fields: Vec<String>,
}

fn poisoned<T>(_: T) -> QuarryError {
    QuarryError::Storage(StorageError::LockPoisoned)
}

fn not_found(collection: &str) -> QuarryError {
    QuarryError::Storage(StorageError::CollectionNotFound {
        collection: collection.to_string(),
    })
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose text search covers the configured fields.
    pub fn with_config(config: &QueryConfig) -> Self {
        Self {
            text_search_fields: config.text_search_fields.clone(),
            ..Self::default()
        }
    }

    /// Restrict text search to `fields` (empty = every string field).
    pub fn with_text_search_fields(mut self, fields: Vec<String>) -> Self {
        self.text_search_fields = fields;
        self
    }

    fn read(&self) -> QuarryResult<RwLockReadGuard<'_, HashMap<String, Vec<Document>>>> {
        self.collections.read().map_err(poisoned)
    }

    fn write(&self) -> QuarryResult<RwLockWriteGuard<'_, HashMap<String, Vec<Document>>>> {
        self.collections.write().map_err(poisoned)
    }

    /// Create an empty collection. Existing collections are left untouched.
    pub fn create_collection(&self, name: &str) -> QuarryResult<()> {
        self.write()?.entry(name.to_string()).or_default();
        Ok(())
    }

    /// Drop a collection and its documents. Returns whether it existed.
    pub fn drop_collection(&self, name: &str) -> QuarryResult<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    /// Insert a document, creating the collection on first use. A missing
    /// `_id` is filled with a fresh [`DocumentId`]; the document's id is
    /// returned when it is a native id.
    pub fn insert_one(&self, collection: &str, mut doc: Document) -> QuarryResult<FieldValue> {
        let id = doc
            .entry("_id".to_string())
            .or_insert_with(|| FieldValue::Id(DocumentId::new()))
            .clone();
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("_id").is_some_and(|existing| existing.loose_eq(&id))) {
            return Err(QuarryError::Storage(StorageError::InsertFailed {
                collection: collection.to_string(),
                reason: format!("duplicate _id {}", id.to_json()),
            }));
        }
        docs.push(doc);
        tracing::trace!(collection, "Inserted document");
        Ok(id)
    }

    /// Insert every document, stopping at the first failure.
    pub fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Document>,
    ) -> QuarryResult<Vec<FieldValue>> {
        docs.into_iter()
            .map(|doc| self.insert_one(collection, doc))
            .collect()
    }

    /// Insert a JSON object.
    pub fn insert_json(
        &self,
        collection: &str,
        value: serde_json::Value,
    ) -> QuarryResult<FieldValue> {
        let doc = document_from_json(value).ok_or_else(|| {
            QuarryError::Storage(StorageError::InvalidDocument {
                collection: collection.to_string(),
                reason: "expected a JSON object".to_string(),
            })
        })?;
        self.insert_one(collection, doc)
    }

    /// Number of documents in a collection (0 when absent).
    pub fn len(&self, collection: &str) -> QuarryResult<usize> {
        Ok(self.read()?.get(collection).map_or(0, Vec::len))
    }

    pub fn is_empty(&self, collection: &str) -> QuarryResult<bool> {
        Ok(self.len(collection)? == 0)
    }

    /// Remove every collection and session.
    pub fn clear(&self) -> QuarryResult<()> {
        self.write()?.clear();
        self.sessions.write().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Open a session. Calls made under it fail once it is ended.
    pub fn start_session(&self) -> QuarryResult<Session> {
        let session = Session::new();
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session.id(), SessionState::Active);
        tracing::debug!(session_id = %session, "Session started");
        Ok(session)
    }

    pub fn end_session(&self, session: &Session) -> QuarryResult<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        match sessions.get_mut(&session.id()) {
            Some(state) => {
                *state = SessionState::Ended;
                tracing::debug!(session_id = %session, "Session ended");
                Ok(())
            }
            None => Err(QuarryError::Storage(StorageError::SessionNotFound {
                session_id: session.to_string(),
            })),
        }
    }

    fn check_session(&self, session: Option<&Session>) -> QuarryResult<()> {
        let Some(session) = session else {
            return Ok(());
        };
        let sessions = self.sessions.read().map_err(poisoned)?;
        match sessions.get(&session.id()) {
            Some(SessionState::Active) => Ok(()),
            Some(SessionState::Ended) => Err(QuarryError::Storage(StorageError::SessionEnded {
                session_id: session.to_string(),
            })),
            None => Err(QuarryError::Storage(StorageError::SessionNotFound {
                session_id: session.to_string(),
            })),
        }
    }

    fn snapshot(&self, collection: &str) -> QuarryResult<Vec<Document>> {
        self.read()?
            .get(collection)
            .cloned()
            .ok_or_else(|| not_found(collection))
    }

    fn filtered(&self, collection: &str, filter: &FilterExpr) -> QuarryResult<Vec<Document>> {
        let matcher = Matcher::new(filter, &self.text_search_fields)?;
        let docs = self.snapshot(collection)?;
        if filter.is_always() {
            return Ok(docs);
        }
        Ok(docs.into_iter().filter(|d| matcher.matches(d)).collect())
    }
}

impl IdCodec for MemoryStore {
    fn is_valid_id(&self, value: &str) -> bool {
        HexIdCodec.is_valid_id(value)
    }

    fn to_id(&self, value: &str) -> Option<DocumentId> {
        HexIdCodec.to_id(value)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        self.check_session(session)?;
        let mut docs = self.filtered(collection, &options.filter)?;
        eval::sort_documents(&mut docs, &options.sort);
        let docs = eval::window(docs, options.skip, options.limit);
        let docs = match &options.projection {
            Some(spec) => docs.iter().map(|d| eval::project(d, spec)).collect(),
            None => docs,
        };
        tracing::trace!(collection, returned = docs.len(), "find");
        Ok(docs)
    }

    async fn count(
        &self,
        collection: &str,
        filter: &FilterExpr,
        session: Option<&Session>,
    ) -> QuarryResult<u64> {
        self.check_session(session)?;
        let total = self.filtered(collection, filter)?.len() as u64;
        tracing::trace!(collection, total, "count");
        Ok(total)
    }

    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[PipelineStage],
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        self.check_session(session)?;
        let mut docs = self.snapshot(collection)?;
        for stage in stages {
            docs = match stage {
                PipelineStage::Match(filter) => {
                    let matcher = Matcher::new(filter, &self.text_search_fields)?;
                    docs.into_iter().filter(|d| matcher.matches(d)).collect()
                }
                PipelineStage::Join(spec) => {
                    let foreign = self.snapshot(&spec.from)?;
                    eval::join(docs, &foreign, spec)
                }
                PipelineStage::ComputeFields(fields) => docs
                    .into_iter()
                    .map(|mut d| {
                        for (name, expr) in fields {
                            let value = eval::evaluate(expr, &d);
                            quarry_core::set_path(&mut d, name, value);
                        }
                        d
                    })
                    .collect(),
                PipelineStage::Project(spec) => {
                    docs.iter().map(|d| eval::project(d, spec)).collect()
                }
                PipelineStage::Sort(spec) => {
                    eval::sort_documents(&mut docs, spec);
                    docs
                }
                PipelineStage::Window { skip, limit } => eval::window(docs, *skip, Some(*limit)),
            };
        }
        tracing::trace!(collection, stages = stages.len(), returned = docs.len(), "run_pipeline");
        Ok(docs)
    }
}
