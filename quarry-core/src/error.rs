//! Error types for Quarry operations

use thiserror::Error;

/// Storage collaborator errors. These are surfaced to callers unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session already ended: {session_id}")]
    SessionEnded { session_id: String },

    #[error("Insert failed for {collection}: {reason}")]
    InsertFailed { collection: String, reason: String },

    #[error("Invalid document for {collection}: {reason}")]
    InvalidDocument { collection: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Query construction and evaluation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid query spec: {reason}")]
    InvalidQuerySpec { reason: String },

    #[error("Invalid regex on {field}: {reason}")]
    InvalidRegex { field: String, reason: String },

    #[error("Invalid {stage} stage: {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("Failed to decode {collection} record: {reason}")]
    DecodeFailed { collection: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Quarry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
