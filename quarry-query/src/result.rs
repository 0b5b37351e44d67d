//! Query results.

use quarry_core::{Document, FieldValue, PaginationResult, QuarryResult, QueryError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One page of records plus its pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T = Document> {
    pub data: Vec<T>,
    pub pagination: PaginationResult,
    #[serde(skip)]
    collection: String,
}

impl<T> QueryResult<T> {
    pub fn new(collection: impl Into<String>, data: Vec<T>, pagination: PaginationResult) -> Self {
        Self {
            data,
            pagination,
            collection: collection.into(),
        }
    }

    /// Collection the records came from.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Transform every record, keeping the pagination metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> QueryResult<U> {
        QueryResult {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
            collection: self.collection,
        }
    }
}

impl QueryResult<Document> {
    /// Deserialize every record into `T`.
    ///
    /// Dates arrive as RFC 3339 strings and identifiers as hex strings, so
    /// DTO fields for them should be `chrono::DateTime<Utc>` / `String` (or
    /// `DocumentId`).
    pub fn decode<T: DeserializeOwned>(self) -> QuarryResult<QueryResult<T>> {
        let mut data = Vec::with_capacity(self.data.len());
        for doc in self.data {
            let value = FieldValue::Document(doc).to_json();
            let record = serde_json::from_value(value).map_err(|e| QueryError::DecodeFailed {
                collection: self.collection.clone(),
                reason: e.to_string(),
            })?;
            data.push(record);
        }
        Ok(QueryResult {
            data,
            pagination: self.pagination,
            collection: self.collection,
        })
    }

    /// `{ "data": [...], "pagination": {...} }` envelope.
    pub fn to_json(&self) -> serde_json::Value {
        let data: Vec<serde_json::Value> = self
            .data
            .iter()
            .map(|doc| FieldValue::Document(doc.clone()).to_json())
            .collect();
        serde_json::json!({
            "data": data,
            "pagination": {
                "page": self.pagination.page(),
                "limit": self.pagination.limit(),
                "total": self.pagination.total(),
                "pages": self.pagination.pages(),
                "hasNext": self.pagination.has_next(),
                "hasPrev": self.pagination.has_prev(),
            },
        })
    }
}
