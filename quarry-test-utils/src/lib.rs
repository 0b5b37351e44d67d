//! Quarry Test Utilities
//!
//! Shared test infrastructure for the Quarry workspace:
//! - A recording store wrapper that logs every collaborator call
//! - Proptest generators for filters, query parameters and pagination input
//! - Seeded fixtures modelled on the backend's collections
//! - Assertions for Quarry error variants

pub use quarry_storage::MemoryStore;

pub use quarry_core::{
    Document, DocumentId, FieldValue, FilterExpr, PipelineStage, QuarryError, QuarryResult,
    QueryConfig, QueryError, StorageError,
};

use async_trait::async_trait;
use quarry_storage::{DocumentStore, FindOptions, IdCodec, Session};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// RECORDING STORE
// ============================================================================

/// Collaborator operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Find,
    Count,
    RunPipeline,
}

/// One call made against a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: Operation,
    pub collection: String,
    pub session: Option<Uuid>,
    /// Filter for `find` and `count`
    pub filter: Option<FilterExpr>,
    /// Stages for `run_pipeline`
    pub stages: Vec<PipelineStage>,
}

/// Store wrapper that records every call before delegating.
///
/// Optionally fails every call with a fixed error, to check that
/// collaborator failures reach the caller unchanged.
#[derive(Debug, Clone)]
pub struct RecordingStore<S> {
    inner: S,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failure: Option<QuarryError>,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    /// Fail every call with `error` (calls are still recorded).
    pub fn failing_with(mut self, error: impl Into<QuarryError>) -> Self {
        self.failure = Some(error.into());
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Snapshot of the calls made so far, in completion order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .collect()
    }

    fn record(&self, call: RecordedCall) -> QuarryResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl<S: IdCodec> IdCodec for RecordingStore<S> {
    fn is_valid_id(&self, value: &str) -> bool {
        self.inner.is_valid_id(value)
    }

    fn to_id(&self, value: &str) -> Option<DocumentId> {
        self.inner.to_id(value)
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for RecordingStore<S> {
    async fn find(
        &self,
        collection: &str,
        options: &FindOptions,
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        self.record(RecordedCall {
            operation: Operation::Find,
            collection: collection.to_string(),
            session: session.map(Session::id),
            filter: Some(options.filter.clone()),
            stages: Vec::new(),
        })?;
        self.inner.find(collection, options, session).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: &FilterExpr,
        session: Option<&Session>,
    ) -> QuarryResult<u64> {
        self.record(RecordedCall {
            operation: Operation::Count,
            collection: collection.to_string(),
            session: session.map(Session::id),
            filter: Some(filter.clone()),
            stages: Vec::new(),
        })?;
        self.inner.count(collection, filter, session).await
    }

    async fn run_pipeline(
        &self,
        collection: &str,
        stages: &[PipelineStage],
        session: Option<&Session>,
    ) -> QuarryResult<Vec<Document>> {
        self.record(RecordedCall {
            operation: Operation::RunPipeline,
            collection: collection.to_string(),
            session: session.map(Session::id),
            filter: None,
            stages: stages.to_vec(),
        })?;
        self.inner.run_pipeline(collection, stages, session).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Quarry inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random DocumentId.
    pub fn arb_document_id() -> impl Strategy<Value = DocumentId> {
        any::<[u8; 12]>().prop_map(DocumentId::from_bytes)
    }

    /// Field name that is not reserved and does not look like an id field.
    pub fn arb_plain_field() -> impl Strategy<Value = String> {
        "[a-hj-z][a-hj-z]{0,7}".prop_filter("reserved key", |f| {
            !["page", "limit", "sort", "fields", "search"].contains(&f.as_str())
        })
    }

    /// Text value that translation keeps as a string: no commas, not a
    /// boolean word, not numeric, not a date.
    pub fn arb_plain_text() -> impl Strategy<Value = String> {
        "[a-z][a-z ]{0,11}".prop_filter("coercible text", |s| {
            !s.eq_ignore_ascii_case("true") && !s.eq_ignore_ascii_case("false")
        })
    }

    /// Parts of a comma-joined list, none of them a boolean word.
    pub fn arb_comma_list() -> impl Strategy<Value = Vec<String>> {
        let part = "[a-z]{1,6}".prop_filter("boolean word", |s| s != "true" && s != "false");
        prop::collection::vec(part, 2..6)
    }

    /// Inclusive numeric range bounds.
    pub fn arb_range() -> impl Strategy<Value = (i64, i64)> {
        (-10_000i64..10_000, 0i64..10_000).prop_map(|(lo, width)| (lo, lo + width))
    }

    /// Raw page/limit input as it may arrive in a query string.
    pub fn arb_raw_pagination_value() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            (-5i64..500).prop_map(|n| Some(n.to_string())),
            "[a-z]{1,4}".prop_map(Some),
            Just(Some("2.5".to_string())),
            Just(Some(String::new())),
        ]
    }

    /// A timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = chrono::DateTime<chrono::Utc>> {
        (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Seeded collections for end-to-end query tests.
    //!
    //! `orders` holds 15 records: 12 with status `active` or `pending` and 3
    //! `closed`. Every fourth order references a user that does not exist.

    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    pub const USER_IDS: [&str; 3] = [
        "507f1f77bcf86cd799439011",
        "507f1f77bcf86cd799439012",
        "507f1f77bcf86cd799439013",
    ];

    /// Id referenced by orders whose user does not exist.
    pub const MISSING_USER_ID: &str = "507f1f77bcf86cd7994390ff";

    pub const ORDER_COUNT: usize = 15;
    pub const OPEN_ORDER_COUNT: usize = 12;

    fn id(hex: &str) -> FieldValue {
        DocumentId::parse_str(hex).map_or(FieldValue::Null, FieldValue::Id)
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn doc(value: serde_json::Value) -> Document {
        quarry_core::document_from_json(value).unwrap_or_default()
    }

    pub fn users() -> Vec<Document> {
        let rows = [
            ("Ada Lovelace", "ada@example.com", "admin", true),
            ("Grace Hopper", "grace@example.com", "user", true),
            ("Linus Torvalds", "linus@example.com", "user", false),
        ];
        rows.iter()
            .zip(USER_IDS)
            .enumerate()
            .map(|(i, ((name, email, role, active), hex))| {
                let mut d = doc(json!({
                    "name": name,
                    "email": email,
                    "role": role,
                    "isActive": active,
                    "password": "hashed",
                }));
                d.insert("_id".to_string(), id(hex));
                d.insert(
                    "createdAt".to_string(),
                    FieldValue::Date(base_time() + Duration::days(i as i64)),
                );
                d
            })
            .collect()
    }

    pub fn products() -> Vec<Document> {
        let rows = [
            ("Oak Chair", "furniture", 45.0, 12, vec!["wood", "seating"]),
            ("Standing Desk", "furniture", 320.0, 4, vec!["desk"]),
            ("Desk Lamp", "lighting", 25.5, 40, vec!["lamp", "desk"]),
            ("Floor Lamp", "lighting", 89.0, 0, vec!["lamp"]),
            ("Notebook", "office", 3.5, 200, vec!["paper"]),
            ("Fountain Pen", "office", 18.0, 35, vec!["pen", "gift"]),
        ];
        rows.into_iter()
            .enumerate()
            .map(|(i, (name, category, price, stock, tags))| {
                let mut d = doc(json!({
                    "name": name,
                    "category": category,
                    "price": price,
                    "stock": stock,
                    "tags": tags,
                }));
                d.insert(
                    "createdAt".to_string(),
                    FieldValue::Date(base_time() + Duration::hours(i as i64)),
                );
                d
            })
            .collect()
    }

    /// Status of order `i`: every fifth is closed, the rest alternate
    /// between active and pending.
    pub fn order_status(i: usize) -> &'static str {
        if i % 5 == 4 {
            "closed"
        } else if i % 2 == 0 {
            "active"
        } else {
            "pending"
        }
    }

    pub fn orders() -> Vec<Document> {
        (0..ORDER_COUNT)
            .map(|i| {
                let user = if i % 4 == 3 {
                    MISSING_USER_ID
                } else {
                    USER_IDS[i % 4]
                };
                let items: Vec<serde_json::Value> = (0..=(i % 3))
                    .map(|n| json!({ "sku": format!("SKU-{}", n) }))
                    .collect();
                let mut d = doc(json!({
                    "number": i as i64 + 1,
                    "status": order_status(i),
                    "total": 10.0 * (i as f64 + 1.0),
                    "items": items,
                }));
                d.insert("userId".to_string(), id(user));
                d.insert(
                    "createdAt".to_string(),
                    FieldValue::Date(base_time() + Duration::days(i as i64)),
                );
                d
            })
            .collect()
    }

    pub fn notifications() -> Vec<Document> {
        (0..4)
            .map(|i| {
                let mut d = doc(json!({
                    "message": format!("Order {} shipped", i + 1),
                    "read": i % 2 == 0,
                }));
                d.insert("userId".to_string(), id(USER_IDS[i % USER_IDS.len()]));
                d.insert(
                    "createdAt".to_string(),
                    FieldValue::Date(base_time() + Duration::minutes(i as i64)),
                );
                d
            })
            .collect()
    }

    /// A store seeded with users, products, orders and notifications.
    pub fn seeded_store() -> QuarryResult<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_many("users", users())?;
        store.insert_many("products", products())?;
        store.insert_many("orders", orders())?;
        store.insert_many("notifications", notifications())?;
        Ok(store)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Quarry error variants.

    use super::*;

    /// Assert that a QuarryResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a QuarryResult is a CollectionNotFound error for `name`.
    #[track_caller]
    pub fn assert_collection_not_found<T: std::fmt::Debug>(result: &QuarryResult<T>, name: &str) {
        match result {
            Err(QuarryError::Storage(StorageError::CollectionNotFound { collection })) => {
                assert_eq!(collection, name, "Wrong collection in CollectionNotFound");
            }
            other => panic!("Expected CollectionNotFound({}), got: {:?}", name, other),
        }
    }

    /// Assert that a QuarryResult is a Query error.
    #[track_caller]
    pub fn assert_query_error<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Query(_)) => {}
            other => panic!("Expected Query error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_order_fixture_counts() {
        let open = (0..ORDER_COUNT)
            .filter(|i| order_status(*i) != "closed")
            .count();
        assert_eq!(open, OPEN_ORDER_COUNT);
        assert_eq!(orders().len(), ORDER_COUNT);
    }

    #[test]
    fn test_seeded_store() {
        let store = seeded_store().expect("seeding should succeed");
        assert_eq!(store.len("users").expect("len"), 3);
        assert_eq!(store.len("orders").expect("len"), ORDER_COUNT);
        assert!(users()
            .iter()
            .all(|u| matches!(u.get("_id"), Some(FieldValue::Id(_)))));
    }
}
