//! Quarry Query - Query Translation, Pipelines and Pagination
//!
//! Turns HTTP query-string style parameters into typed filters and stage
//! pipelines, runs them against a [`quarry_storage::DocumentStore`] and
//! returns `{ data, pagination }` results.
//!
//! - [`QuerySpec`]: parsed query input with the reserved control keys split
//!   out
//! - [`FilterTranslator`]: query parameters to [`quarry_core::FilterExpr`]
//! - [`QueryBuilder`]: simple mode, one scan plus one count
//! - [`PipelineBuilder`]: aggregation mode with joins, computed fields and
//!   projections

pub mod pipeline;
pub mod query;
pub mod query_spec;
pub mod result;
pub mod translator;

pub use pipeline::PipelineBuilder;
pub use query::QueryBuilder;
pub use query_spec::{is_reserved, QuerySpec, RawValue, RESERVED_KEYS};
pub use result::QueryResult;
pub use translator::{is_identifier_field, FilterTranslator, REGEX_OPTIONS_KEY};
