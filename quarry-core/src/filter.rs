//! Typed filter expressions.
//!
//! A [`FilterExpr`] is the structured form of "which records match". Leaf
//! conditions compare one field against an already-coerced value; `And`/`Or`
//! combine children; `Text` is a full-text predicate over the collection's
//! searchable fields. The empty conjunction is the always-true filter.

use crate::value::FieldValue;
use serde::Serialize;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// In list of values
    In,
    /// Not in list of values
    Nin,
    /// Matches regular expression
    Regex {
        #[serde(rename = "caseInsensitive")]
        case_insensitive: bool,
    },
    /// Field presence (value is a boolean)
    Exists,
}

impl FilterOperator {
    /// Whether this is one of gt/gte/lt/lte.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        )
    }

    /// Operator keyword as written in query mappings.
    pub fn keyword(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
            FilterOperator::Nin => "nin",
            FilterOperator::Regex { .. } => "regex",
            FilterOperator::Exists => "exists",
        }
    }
}

/// Leaf predicate: `field <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCondition {
    /// Field to filter on (dotted paths allowed)
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against, already type-coerced
    pub value: FieldValue,
}

/// Filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterExpr {
    Condition(FilterCondition),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    /// Full-text search over the searchable fields of a collection.
    Text(String),
}

impl Default for FilterExpr {
    fn default() -> Self {
        Self::always()
    }
}

impl FilterExpr {
    /// The always-true filter.
    pub fn always() -> Self {
        FilterExpr::And(Vec::new())
    }

    pub fn is_always(&self) -> bool {
        matches!(self, FilterExpr::And(children) if children.is_empty())
    }

    /// Create a leaf condition.
    pub fn condition(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FieldValue>,
    ) -> Self {
        FilterExpr::Condition(FilterCondition {
            field: field.into(),
            operator,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Lte, value)
    }

    pub fn in_list(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::In, FieldValue::Array(values))
    }

    pub fn not_in(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self::condition(field, FilterOperator::Nin, FieldValue::Array(values))
    }

    /// Case-insensitive unless `case_insensitive` is false.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, case_insensitive: bool) -> Self {
        Self::condition(
            field,
            FilterOperator::Regex { case_insensitive },
            FieldValue::String(pattern.into()),
        )
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::condition(field, FilterOperator::Exists, FieldValue::Bool(present))
    }

    pub fn text(query: impl Into<String>) -> Self {
        FilterExpr::Text(query.into())
    }

    /// Conjoin two filters, flattening nested conjunctions and dropping
    /// always-true operands.
    pub fn and(self, other: FilterExpr) -> FilterExpr {
        match (self, other) {
            (a, b) if b.is_always() => a,
            (a, b) if a.is_always() => b,
            (FilterExpr::And(mut left), FilterExpr::And(right)) => {
                left.extend(right);
                FilterExpr::And(left)
            }
            (FilterExpr::And(mut left), b) => {
                left.push(b);
                FilterExpr::And(left)
            }
            (a, FilterExpr::And(mut right)) => {
                right.insert(0, a);
                FilterExpr::And(right)
            }
            (a, b) => FilterExpr::And(vec![a, b]),
        }
    }

    /// Disjoin two filters.
    pub fn or(self, other: FilterExpr) -> FilterExpr {
        match self {
            FilterExpr::Or(mut children) => {
                children.push(other);
                FilterExpr::Or(children)
            }
            first => FilterExpr::Or(vec![first, other]),
        }
    }

    /// Conjoin every filter in `filters`.
    pub fn all(filters: impl IntoIterator<Item = FilterExpr>) -> FilterExpr {
        filters.into_iter().fold(FilterExpr::always(), FilterExpr::and)
    }

    /// Leaf conditions of a pure conjunction, or `None` when the tree has
    /// disjunctions or text predicates.
    pub fn conjunctive_conditions(&self) -> Option<Vec<&FilterCondition>> {
        match self {
            FilterExpr::Condition(c) => Some(vec![c]),
            FilterExpr::And(children) => {
                let mut out = Vec::new();
                for child in children {
                    out.extend(child.conjunctive_conditions()?);
                }
                Some(out)
            }
            FilterExpr::Or(_) | FilterExpr::Text(_) => None,
        }
    }
}
