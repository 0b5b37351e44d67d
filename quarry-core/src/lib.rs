//! Quarry Core - Query Data Types
//!
//! Pure data structures shared by the storage and query crates: the document
//! value model, native identifiers, filter expressions, pipeline stages, the
//! pagination calculator, configuration and errors.

pub mod config;
pub mod error;
pub mod filter;
pub mod id;
pub mod pagination;
pub mod stage;
pub mod value;

pub use config::{QueryConfig, DEFAULT_SORT_FIELD};
pub use error::{ConfigError, QuarryError, QuarryResult, QueryError, StorageError};
pub use filter::{FilterCondition, FilterExpr, FilterOperator};
pub use id::{DocumentId, ParseDocumentIdError, DOCUMENT_ID_HEX_LEN};
pub use pagination::{
    PageLimits, PaginationRequest, PaginationResult, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT,
};
pub use stage::{
    Expr, JoinSpec, PipelineStage, Projection, ProjectionSpec, SortDirection, SortSpec,
};
pub use value::{document_from_json, get_path, remove_path, set_path, Document, FieldValue};
