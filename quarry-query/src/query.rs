//! Simple-mode queries: one filtered scan plus a count.

use crate::query_spec::QuerySpec;
use crate::result::QueryResult;
use crate::translator::FilterTranslator;
use quarry_core::{
    FilterExpr, PaginationRequest, ProjectionSpec, QuarryResult, QueryConfig, SortSpec,
};
use quarry_storage::{DocumentStore, FindOptions, IdCodec, Session};
use std::time::Instant;
use tracing::{debug, warn};

/// Builds and runs a `find` + `count` pair against one collection.
///
/// ```ignore
/// let page = QueryBuilder::new(&store, "users")
///     .from_query(&QuerySpec::from_pairs(params))
///     .execute()
///     .await?;
/// ```
pub struct QueryBuilder<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    collection: String,
    config: QueryConfig,
    filter: FilterExpr,
    sort: Option<SortSpec>,
    selection: Option<ProjectionSpec>,
    pagination: PaginationRequest,
    session: Option<Session>,
}

impl<'s, S: DocumentStore + ?Sized> QueryBuilder<'s, S> {
    pub fn new(store: &'s S, collection: impl Into<String>) -> Self {
        Self::with_config(store, collection, QueryConfig::default())
    }

    pub fn with_config(store: &'s S, collection: impl Into<String>, config: QueryConfig) -> Self {
        let pagination = PaginationRequest::from_raw(None, None, &config.page_limits());
        Self {
            store,
            collection: collection.into(),
            config,
            filter: FilterExpr::always(),
            sort: None,
            selection: None,
            pagination,
            session: None,
        }
    }

    /// Apply filters, sort, field selection and pagination from `spec`
    /// using a free-form translator.
    pub fn from_query(self, spec: &QuerySpec) -> Self {
        let store = self.store;
        let translator = FilterTranslator::with_config(store, &self.config);
        self.from_query_with(&translator, spec)
    }

    /// Like [`from_query`](Self::from_query) with a caller-configured
    /// translator, e.g. one restricted to whitelisted fields.
    pub fn from_query_with<C: IdCodec + ?Sized>(
        mut self,
        translator: &FilterTranslator<'_, C>,
        spec: &QuerySpec,
    ) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(translator.translate(spec));
        if let Some(sort) = spec.sort_spec() {
            self.sort = Some(sort);
        }
        if let Some(selection) = spec.field_selection() {
            self.selection = Some(selection);
        }
        self.pagination =
            PaginationRequest::from_raw(spec.page(), spec.limit(), &self.config.page_limits());
        self
    }

    /// Conjoin `filter` with the current filter.
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn select(mut self, selection: ProjectionSpec) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn paginate(mut self, page: i64, limit: i64) -> Self {
        self.pagination = PaginationRequest::new(page, limit, &self.config.page_limits());
        self
    }

    /// Run both calls under `session`.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn current_filter(&self) -> &FilterExpr {
        &self.filter
    }

    /// Fetch the page and the total concurrently.
    pub async fn execute(self) -> QuarryResult<QueryResult> {
        let started = Instant::now();
        let options = FindOptions {
            filter: self.filter,
            sort: self
                .sort
                .unwrap_or_else(|| SortSpec::newest_first(self.config.default_sort_field.as_str())),
            projection: self.selection,
            skip: self.pagination.skip(),
            limit: Some(self.pagination.limit),
        };
        let session = self.session.as_ref();
        let collection = self.collection.as_str();

        let (data, total) = tokio::join!(
            self.store.find(collection, &options, session),
            self.store.count(collection, &options.filter, session),
        );
        let data = data.inspect_err(|e| warn!(collection, error = %e, "Find failed"))?;
        let total = total.inspect_err(|e| warn!(collection, error = %e, "Count failed"))?;

        let pagination = self.pagination.result(total);
        debug!(
            collection,
            returned = data.len(),
            total,
            page = pagination.page(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Query executed"
        );
        Ok(QueryResult::new(self.collection, data, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::FieldValue::Int;
    use quarry_core::{document_from_json, Projection, QuarryError, StorageError};
    use quarry_storage::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for (i, status) in ["active", "pending", "closed", "active"].iter().enumerate() {
            store
                .insert_json(
                    "tickets",
                    json!({
                        "n": i as i64,
                        "status": status,
                        "createdAt": format!("2024-01-0{}T00:00:00Z", i + 1),
                    }),
                )
                .expect("insert should succeed");
        }
        store
    }

    #[tokio::test]
    async fn test_defaults_sort_newest_first() {
        let store = store();
        let result = QueryBuilder::new(&store, "tickets")
            .execute()
            .await
            .expect("query should succeed");
        // createdAt is stored as a string here; ISO strings sort chronologically
        let ns: Vec<_> = result.data.iter().map(|d| d["n"].clone()).collect();
        assert_eq!(ns, vec![Int(3), Int(2), Int(1), Int(0)]);
        assert_eq!(result.pagination.limit(), 10);
        assert_eq!(result.pagination.total(), 4);
    }

    #[tokio::test]
    async fn test_filter_and_selection() {
        let store = store();
        let spec = QuerySpec::new()
            .with("status", "active")
            .with("fields", "n")
            .with("sort", "n");
        let result = QueryBuilder::new(&store, "tickets")
            .from_query(&spec)
            .execute()
            .await
            .expect("query should succeed");
        assert_eq!(result.len(), 2);
        assert_eq!(result.data[0]["n"], Int(0));
        assert!(result.data[0].get("status").is_none());
        assert!(result.data[0].contains_key("_id"));
    }

    #[tokio::test]
    async fn test_selection_does_not_change_total() {
        let store = store();
        let result = QueryBuilder::new(&store, "tickets")
            .select(vec![("status".to_string(), Projection::Include)])
            .paginate(1, 1)
            .execute()
            .await
            .expect("query should succeed");
        assert_eq!(result.len(), 1);
        assert_eq!(result.pagination.total(), 4);
        assert_eq!(result.pagination.pages(), 4);
        assert!(result.pagination.has_next());
    }

    #[tokio::test]
    async fn test_missing_collection_surfaces_storage_error() {
        let store = MemoryStore::new();
        let err = QueryBuilder::new(&store, "ghosts")
            .execute()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QuarryError::Storage(StorageError::CollectionNotFound {
                collection: "ghosts".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_filter_calls_conjoin() {
        let store = MemoryStore::new();
        store
            .insert_one(
                "tickets",
                document_from_json(json!({"a": 1, "b": 2})).expect("object"),
            )
            .expect("insert should succeed");
        let builder = QueryBuilder::new(&store, "tickets")
            .filter(FilterExpr::eq("a", 1))
            .filter(FilterExpr::eq("b", 3));
        assert_eq!(
            builder.current_filter(),
            &FilterExpr::eq("a", 1).and(FilterExpr::eq("b", 3))
        );
        let result = builder.execute().await.expect("query should succeed");
        assert!(result.is_empty());
        assert_eq!(result.pagination.total(), 0);
    }
}
