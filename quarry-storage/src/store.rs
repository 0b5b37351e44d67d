//! Storage collaborator contract.
//!
//! The query engine never talks to a database directly; it drives a
//! [`DocumentStore`] that can scan, count and run stage pipelines against a
//! named collection. Implementations own connection lifecycle, timeouts and
//! retries. Errors they return are handed back to callers unchanged.

use ::async_trait::async_trait;
use quarry_core::{
    Document, DocumentId, FilterExpr, PipelineStage, ProjectionSpec, QuarryResult, SortSpec,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Transaction/session handle issued by a store.
///
/// A query builder holds at most one handle and passes it to every call it
/// makes; the handle is opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    id: Uuid,
}

impl Session {
    pub fn new() -> Self {
        Self { id: Uuid::now_v7() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Options for a single-collection scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: FilterExpr,
    pub sort: SortSpec,
    /// `None` returns whole documents
    pub projection: Option<ProjectionSpec>,
    pub skip: u64,
    /// `None` means no limit
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new(filter: FilterExpr) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Identifier format check and conversion for the store's native ids.
pub trait IdCodec: Send + Sync {
    /// Whether `value` has the store's identifier format.
    fn is_valid_id(&self, value: &str) -> bool;

    /// Convert to the native identifier, or `None` when malformed.
    fn to_id(&self, value: &str) -> Option<DocumentId>;
}

/// Codec for 24-character hex document ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexIdCodec;

impl IdCodec for HexIdCodec {
    fn is_valid_id(&self, value: &str) -> bool {
        DocumentId::is_valid(value)
    }

    fn to_id(&self, value: &str) -> Option<DocumentId> {
        DocumentId::parse_str(value)
    }
}

/// Async document store used by the query engine.
#[async_trait]
pub trait DocumentStore: IdCodec {
    /// Filtered, sorted, windowed scan of one collection.
    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>>;

    /// Number of documents matching `filter`.
    async fn count(
        &self,
        collection: &str,
        filter: &FilterExpr,
        session: Option<&Session>,
    ) -> QuarryResult<u64>;

    /// Run `stages` in order against `collection`.
    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[PipelineStage],
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>>;
}

impl<T: IdCodec + ?Sized> IdCodec for Arc<T> {
    fn is_valid_id(&self, value: &str) -> bool {
        (**self).is_valid_id(value)
    }

    fn to_id(&self, value: &str) -> Option<DocumentId> {
        (**self).to_id(value)
    }
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        (**self).find(collection, options, session).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: &FilterExpr,
        session: Option<&Session>,
    ) -> QuarryResult<u64> {
        (**self).count(collection, filter, session).await
    }

    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[PipelineStage],
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        (**self).run_pipeline(collection, stages, session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_codec() {
        let codec = HexIdCodec;
        assert!(codec.is_valid_id("507f1f77bcf86cd799439011"));
        assert!(!codec.is_valid_id("not-an-id"));
        assert_eq!(
            codec.to_id("507f1f77bcf86cd799439011").map(|id| id.to_hex()),
            Some("507f1f77bcf86cd799439011".to_string())
        );
        assert!(codec.to_id("zzzf1f77bcf86cd799439011").is_none());
    }

    #[test]
    fn test_sessions_are_distinct() {
        assert_ne!(Session::new(), Session::new());
    }

    #[test]
    fn test_find_options_default_is_unbounded_scan() {
        let opts = FindOptions::default();
        assert!(opts.filter.is_always());
        assert!(opts.limit.is_none());
        assert_eq!(opts.skip, 0);
    }
}
