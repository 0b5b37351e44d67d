//! End-to-end query scenarios against the seeded in-memory store

use quarry_core::{
    DocumentId, Expr, FieldValue, FilterExpr, JoinSpec, PaginationResult, Projection,
    QuarryError, QuarryResult, SortSpec, StorageError,
};
use quarry_query::{FilterTranslator, PipelineBuilder, QueryBuilder, QuerySpec};
use quarry_test_utils::assertions::{assert_collection_not_found, assert_storage_error};
use quarry_test_utils::fixtures::{self, MISSING_USER_ID, ORDER_COUNT, USER_IDS};
use quarry_test_utils::{MemoryStore, Operation, RecordingStore};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn store() -> QuarryResult<MemoryStore> {
    init_tracing();
    fixtures::seeded_store()
}

fn open_orders_page_two() -> QuerySpec {
    QuerySpec::from_pairs([("page", "2"), ("limit", "5"), ("status", "active,pending")])
}

// ============================================================================
// SIMPLE MODE
// ============================================================================

#[tokio::test]
async fn test_second_page_of_open_orders() -> QuarryResult<()> {
    let store = store()?;
    let result = QueryBuilder::new(&store, "orders")
        .from_query(&open_orders_page_two())
        .execute()
        .await?;

    assert_eq!(result.len(), 5);
    assert_eq!(result.pagination, PaginationResult::new(2, 5, 12));
    assert_eq!(result.pagination.pages(), 3);
    assert!(result.pagination.has_next());
    assert!(result.pagination.has_prev());
    assert!(result.data.iter().all(|d| {
        matches!(d.get("status"), Some(FieldValue::String(s)) if s != "closed")
    }));
    Ok(())
}

#[tokio::test]
async fn test_empty_query_uses_defaults() -> QuarryResult<()> {
    let store = RecordingStore::new(store()?);
    let spec = QuerySpec::from_json(json!({}))?;
    let result = QueryBuilder::new(&store, "orders")
        .from_query(&spec)
        .execute()
        .await?;

    assert_eq!(result.len(), 10);
    assert_eq!(result.pagination, PaginationResult::new(1, 10, ORDER_COUNT as u64));
    // Newest order first
    assert_eq!(result.data[0]["number"], FieldValue::Int(ORDER_COUNT as i64));

    let finds = store.calls_of(Operation::Find);
    assert_eq!(finds.len(), 1);
    assert!(finds[0].filter.as_ref().is_some_and(FilterExpr::is_always));
    Ok(())
}

#[tokio::test]
async fn test_user_id_coercion_matches_native_ids() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new().with("userId", USER_IDS[0]);
    let result = QueryBuilder::new(&store, "orders")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 4);

    let spec = QuerySpec::new().with("userId", "not-an-id");
    let result = QueryBuilder::new(&store, "orders")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 0);
    Ok(())
}

#[tokio::test]
async fn test_price_range_and_sort() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::from_pairs([
        ("price[gte]", "20"),
        ("price[lte]", "100"),
        ("sort", "-price"),
    ]);
    let result = QueryBuilder::new(&store, "products")
        .from_query(&spec)
        .execute()
        .await?;
    let names: Vec<_> = result
        .data
        .iter()
        .filter_map(|d| d.get("name").and_then(FieldValue::as_str))
        .collect();
    assert_eq!(names, vec!["Floor Lamp", "Oak Chair", "Desk Lamp"]);
    Ok(())
}

#[tokio::test]
async fn test_search_and_regex() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new().with("search", "lamp");
    let result = QueryBuilder::new(&store, "products")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 2);

    let spec = QuerySpec::from_json(json!({"name": {"regex": "^DESK"}}))?;
    let result = QueryBuilder::new(&store, "products")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 1);

    let spec = QuerySpec::from_json(json!({"name": {"regex": "^DESK", "options": ""}}))?;
    let result = QueryBuilder::new(&store, "products")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 0);
    Ok(())
}

#[tokio::test]
async fn test_field_exclusion() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new().with("fields", "-password");
    let result = QueryBuilder::new(&store, "users")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.len(), 3);
    assert!(result.data.iter().all(|u| !u.contains_key("password")));
    assert!(result.data.iter().all(|u| u.contains_key("email")));
    Ok(())
}

#[tokio::test]
async fn test_whitelisted_fields_only() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new()
        .with("status", "closed")
        .with("total", "999");
    let translator = FilterTranslator::new(&store).with_allowed_fields(["status"]);
    let result = QueryBuilder::new(&store, "orders")
        .from_query_with(&translator, &spec)
        .execute()
        .await?;
    assert_eq!(result.pagination.total(), 3);
    Ok(())
}

#[tokio::test]
async fn test_boolean_coercion_against_store() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new().with("isActive", "False");
    let result = QueryBuilder::new(&store, "users")
        .from_query(&spec)
        .execute()
        .await?;
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.data[0].get("name").and_then(FieldValue::as_str),
        Some("Linus Torvalds")
    );
    Ok(())
}

#[tokio::test]
async fn test_created_at_date_range() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::from_json(json!({
        "createdAt": {"gte": "2024-01-05", "lt": "2024-01-08"}
    }))?;
    let result = QueryBuilder::new(&store, "orders")
        .from_query(&spec)
        .execute()
        .await?;
    // Orders are created daily at 09:00 from 2024-01-01
    assert_eq!(result.pagination.total(), 3);
    Ok(())
}

// ============================================================================
// AGGREGATION MODE
// ============================================================================

fn orders_with_user(store: &MemoryStore) -> PipelineBuilder<'_, MemoryStore> {
    PipelineBuilder::new(store, "orders")
        .add_join(JoinSpec::new("users", "userId", "_id", "user").single())
}

#[tokio::test]
async fn test_flatten_single_keeps_orders_without_user() -> QuarryResult<()> {
    let store = store()?;
    let missing = DocumentId::parse_str(MISSING_USER_ID).map(FieldValue::Id);
    let result = orders_with_user(&store)
        .sort_by(SortSpec::new().ascending("number"))
        .execute()
        .await?;

    assert_eq!(result.len(), ORDER_COUNT);
    for order in &result.data {
        if order.get("userId") == missing.as_ref() {
            assert!(order.get("user").is_none());
        } else {
            assert!(matches!(order.get("user"), Some(FieldValue::Document(_))));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_projection_never_changes_total() -> QuarryResult<()> {
    let store = store()?;
    let spec = open_orders_page_two();

    let plain = PipelineBuilder::new(&store, "orders")
        .from_query(&spec)
        .execute()
        .await?;
    let projected = PipelineBuilder::new(&store, "orders")
        .from_query(&spec)
        .add_join(JoinSpec::new("users", "userId", "_id", "user").single())
        .add_computed_fields([("customer", Expr::field("user.name"))])
        .project([("customer", Projection::Include), ("total", Projection::Include)])
        .execute()
        .await?;

    assert_eq!(plain.pagination, PaginationResult::new(2, 5, 12));
    assert_eq!(projected.pagination, plain.pagination);
    assert_eq!(projected.len(), 5);
    assert!(projected.data.iter().all(|d| !d.contains_key("status")));
    Ok(())
}

#[tokio::test]
async fn test_default_sort_survives_projection_followed_by_computed_fields() -> QuarryResult<()> {
    let store = store()?;
    let spec = QuerySpec::new().with("limit", "2");
    let result = PipelineBuilder::new(&store, "orders")
        .from_query(&spec)
        .project([("number", Projection::Include)])
        .add_computed_fields([("n2", Expr::field("number"))])
        .execute()
        .await?;

    let numbers: Vec<_> = result.data.iter().map(|d| d["number"].clone()).collect();
    assert_eq!(numbers, vec![FieldValue::Int(15), FieldValue::Int(14)]);
    assert_eq!(result.data[0]["n2"], FieldValue::Int(15));
    assert_eq!(result.pagination, PaginationResult::new(1, 2, ORDER_COUNT as u64));
    Ok(())
}

#[tokio::test]
async fn test_count_reflects_pre_join_cardinality() -> QuarryResult<()> {
    let store = store()?;
    let result = orders_with_user(&store)
        .add_match(FilterExpr::eq("user.isActive", true))
        .execute()
        .await?;

    // Orders of Ada and Grace only; the total still counts every order
    assert_eq!(result.len(), 8);
    assert_eq!(result.pagination.total(), ORDER_COUNT as u64);
    Ok(())
}

#[tokio::test]
async fn test_computed_fields_see_joined_data() -> QuarryResult<()> {
    let store = store()?;
    let result = orders_with_user(&store)
        .add_computed_fields([
            ("customer", Expr::if_null(Expr::field("user.name"), Expr::literal("unknown"))),
            ("itemCount", Expr::size(Expr::field("items"))),
        ])
        .sort_by(SortSpec::new().ascending("number"))
        .paginate(1, 4)
        .execute()
        .await?;

    let customers: Vec<_> = result
        .data
        .iter()
        .filter_map(|d| d.get("customer").and_then(FieldValue::as_str))
        .collect();
    assert_eq!(
        customers,
        vec!["Ada Lovelace", "Grace Hopper", "Linus Torvalds", "unknown"]
    );
    assert_eq!(result.data[2]["itemCount"], FieldValue::Int(3));
    assert_eq!(result.pagination, PaginationResult::new(1, 4, ORDER_COUNT as u64));
    Ok(())
}

#[tokio::test]
async fn test_session_reaches_both_calls() -> QuarryResult<()> {
    let store = RecordingStore::new(store()?);
    let session = store.inner().start_session()?;
    PipelineBuilder::new(&store, "orders")
        .add_match(FilterExpr::eq("status", "active"))
        .with_session(session)
        .execute()
        .await?;

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.session == Some(session.id())));
    assert_eq!(store.calls_of(Operation::RunPipeline).len(), 1);
    assert_eq!(
        store.calls_of(Operation::Count)[0].filter,
        Some(FilterExpr::eq("status", "active"))
    );

    store.inner().end_session(&session)?;
    let ended = QueryBuilder::new(&store, "orders")
        .with_session(session)
        .execute()
        .await;
    assert!(matches!(
        ended,
        Err(QuarryError::Storage(StorageError::SessionEnded { .. }))
    ));
    Ok(())
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_missing_collection_is_surfaced_unchanged() -> QuarryResult<()> {
    let store = store()?;
    let result = QueryBuilder::new(&store, "invoices").execute().await;
    assert_collection_not_found(&result, "invoices");

    let result = PipelineBuilder::new(&store, "orders")
        .add_join(JoinSpec::new("customers", "userId", "_id", "customer"))
        .execute()
        .await;
    assert_collection_not_found(&result, "customers");
    Ok(())
}

#[tokio::test]
async fn test_collaborator_failure_is_not_wrapped() -> QuarryResult<()> {
    let failure = StorageError::Backend {
        reason: "connection reset".to_string(),
    };
    let store = RecordingStore::new(store()?).failing_with(failure.clone());
    let result = QueryBuilder::new(&store, "orders").execute().await;
    assert_storage_error(&result);
    assert_eq!(result.unwrap_err(), QuarryError::Storage(failure));
    Ok(())
}

#[tokio::test]
async fn test_zero_stage_pipeline_is_full_scan() -> QuarryResult<()> {
    let store = store()?;
    let result = PipelineBuilder::new(&store, "products").execute().await?;
    assert_eq!(result.len(), 6);
    assert_eq!(result.pagination, PaginationResult::new(1, 6, 6));
    Ok(())
}
