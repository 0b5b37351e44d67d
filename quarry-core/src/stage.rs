//! Pipeline stages, sort specifications and computed-field expressions.

use crate::filter::FilterExpr;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};

/// Ordering direction for sorted queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order (smallest first).
    Ascending,
    /// Descending order (largest first).
    #[default]
    Descending,
}

/// Ordered sequence of (field, direction) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec(pub Vec<(String, SortDirection)>);

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field descending sort, used as the default ordering on the
    /// creation timestamp.
    pub fn newest_first(field: impl Into<String>) -> Self {
        Self(vec![(field.into(), SortDirection::Descending)])
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.0.push((field.into(), direction));
        self
    }

    pub fn ascending(self, field: impl Into<String>) -> Self {
        self.then(field, SortDirection::Ascending)
    }

    pub fn descending(self, field: impl Into<String>) -> Self {
        self.then(field, SortDirection::Descending)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, SortDirection)> {
        self.0.iter().map(|(f, d)| (f.as_str(), *d))
    }

    /// Parse `"-price,name"`: comma-separated fields, `-` prefix for
    /// descending, optional `+` prefix for ascending. Empty parts are skipped.
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| {
                let (field, direction) = match part.strip_prefix('-') {
                    Some(rest) => (rest, SortDirection::Descending),
                    None => (part.trim_start_matches('+'), SortDirection::Ascending),
                };
                (!field.is_empty()).then(|| (field.to_string(), direction))
            })
            .collect();
        Self(pairs)
    }
}

/// Join (lookup) of a related collection.
///
/// Every owning document is kept; when `flatten_single` is set, the joined
/// array is replaced by its first element, or removed when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Collection to join from
    pub from: String,
    /// Field on the owning document
    pub local_field: String,
    /// Field on the joined documents
    pub foreign_field: String,
    /// Output field on the owning document
    pub as_field: String,
    /// Reduce the joined array to at most one element
    pub flatten_single: bool,
}

impl JoinSpec {
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
            flatten_single: false,
        }
    }

    /// Many-to-one join: joined array reduced to its first element.
    pub fn single(mut self) -> Self {
        self.flatten_single = true;
        self
    }
}

/// Computed-field expression, evaluated per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Value at a dotted path (null when absent)
    Field(String),
    Literal(FieldValue),
    /// Length of an array (0 for non-arrays)
    Size(Box<Expr>),
    /// First element of an array (null when empty or not an array)
    First(Box<Expr>),
    /// String concatenation; null if any operand is null
    Concat(Vec<Expr>),
    Add(Vec<Expr>),
    Multiply(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    /// First operand unless null/absent, otherwise the second
    IfNull(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<FieldValue>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn size(inner: Expr) -> Self {
        Expr::Size(Box::new(inner))
    }

    pub fn first(inner: Expr) -> Self {
        Expr::First(Box::new(inner))
    }

    pub fn subtract(lhs: Expr, rhs: Expr) -> Self {
        Expr::Subtract(Box::new(lhs), Box::new(rhs))
    }

    pub fn divide(lhs: Expr, rhs: Expr) -> Self {
        Expr::Divide(Box::new(lhs), Box::new(rhs))
    }

    pub fn if_null(value: Expr, fallback: Expr) -> Self {
        Expr::IfNull(Box::new(value), Box::new(fallback))
    }
}

/// One entry of a projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Projection {
    Include,
    Exclude,
    /// Output field computed from an expression (renames use `Expr::Field`)
    Computed(Expr),
}

/// Ordered projection mapping.
pub type ProjectionSpec = Vec<(String, Projection)>;

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    Match(FilterExpr),
    Join(JoinSpec),
    ComputeFields(Vec<(String, Expr)>),
    Project(ProjectionSpec),
    Sort(SortSpec),
    Window { skip: u64, limit: u64 },
}

impl PipelineStage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Match(_) => "match",
            PipelineStage::Join(_) => "join",
            PipelineStage::ComputeFields(_) => "compute_fields",
            PipelineStage::Project(_) => "project",
            PipelineStage::Sort(_) => "sort",
            PipelineStage::Window { .. } => "window",
        }
    }
}
