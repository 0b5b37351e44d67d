//! Caller-facing query input.
//!
//! A [`QuerySpec`] is the typed form of an HTTP query string: filter
//! parameters keyed by field name plus the reserved control keys `page`,
//! `limit`, `sort`, `fields` and `search`, which are pulled out at
//! construction and never reach filter translation.

use crate::translator::{is_identifier_field, parse_bool, parse_date, parse_number};
use chrono::SecondsFormat;
use quarry_core::{
    DocumentId, FieldValue, FilterExpr, FilterOperator, Projection, ProjectionSpec, QuarryResult,
    QueryError, SortSpec,
};
use std::collections::BTreeMap;

/// Reserved control keys.
pub const RESERVED_KEYS: [&str; 5] = ["page", "limit", "sort", "fields", "search"];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Raw, not yet coerced parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Text as received in a query string
    Text(String),
    /// Already-typed scalar (JSON number, boolean or null)
    Literal(FieldValue),
    /// Repeated parameter or JSON array
    List(Vec<RawValue>),
    /// Nested operator mapping (`price[gte]=10`, `{"price": {"gte": 10}}`)
    Map(Vec<(String, RawValue)>),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => RawValue::Text(s),
            serde_json::Value::Array(items) => {
                RawValue::List(items.into_iter().map(RawValue::from_json).collect())
            }
            serde_json::Value::Object(map) => RawValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from_json(v)))
                    .collect(),
            ),
            scalar => RawValue::Literal(FieldValue::from_json(scalar)),
        }
    }

    /// Flatten to a single string for control keys: lists are comma-joined.
    fn into_control_string(self) -> Option<String> {
        match self {
            RawValue::Text(s) => Some(s),
            RawValue::Literal(FieldValue::Null) => None,
            RawValue::Literal(FieldValue::String(s)) => Some(s),
            RawValue::Literal(v) => Some(v.to_json().to_string()),
            RawValue::List(items) => {
                let parts: Vec<String> = items
                    .into_iter()
                    .filter_map(RawValue::into_control_string)
                    .collect();
                Some(parts.join(","))
            }
            RawValue::Map(_) => None,
        }
    }

    /// Push `value` onto this value, turning it into a list.
    fn append(self, value: RawValue) -> RawValue {
        match self {
            RawValue::List(mut items) => {
                items.push(value);
                RawValue::List(items)
            }
            single => RawValue::List(vec![single, value]),
        }
    }
}

/// Parsed query input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    params: BTreeMap<String, RawValue>,
    page: Option<String>,
    limit: Option<String>,
    sort: Option<String>,
    fields: Option<String>,
    search: Option<String>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object. Anything but an object is rejected here, at the
    /// boundary, rather than during execution.
    pub fn from_json(value: serde_json::Value) -> QuarryResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(QueryError::InvalidQuerySpec {
                reason: "query must be a JSON object".to_string(),
            }
            .into());
        };
        let mut spec = Self::new();
        for (key, value) in map {
            spec = spec.param(key, RawValue::from_json(value));
        }
        Ok(spec)
    }

    /// Parse decoded query-string pairs. `field[op]=v` builds operator maps
    /// and repeated keys build lists.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = Self::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            let value = RawValue::text(value.as_ref());
            match split_bracket_key(key) {
                Some((field, op)) if !is_reserved(field) => {
                    let entry = spec
                        .params
                        .entry(field.to_string())
                        .or_insert_with(|| RawValue::Map(Vec::new()));
                    if !matches!(entry, RawValue::Map(_)) {
                        tracing::debug!(field, "Operator key replaces plain value");
                        *entry = RawValue::Map(Vec::new());
                    }
                    if let RawValue::Map(entries) = entry {
                        entries.push((op.to_string(), value));
                    }
                }
                _ => {
                    let merged = match spec.params.remove(key) {
                        Some(existing) if !is_reserved(key) => existing.append(value),
                        _ => value,
                    };
                    spec = spec.param(key, merged);
                }
            }
        }
        spec
    }

    /// Set one parameter. Reserved keys are routed to their control slot.
    pub fn param(mut self, key: impl Into<String>, value: RawValue) -> Self {
        let key = key.into();
        match key.as_str() {
            "page" => self.page = value.into_control_string(),
            "limit" => self.limit = value.into_control_string(),
            "sort" => self.sort = value.into_control_string(),
            "fields" => self.fields = value.into_control_string(),
            "search" => self.search = value.into_control_string(),
            _ => {
                self.params.insert(key, value);
            }
        }
        self
    }

    /// Shorthand for a text parameter.
    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.param(key, RawValue::Text(value.into()))
    }

    /// Filter parameters, reserved keys excluded.
    pub fn params(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn page(&self) -> Option<&str> {
        self.page.as_deref()
    }

    pub fn limit(&self) -> Option<&str> {
        self.limit.as_deref()
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn sort_raw(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    pub fn fields_raw(&self) -> Option<&str> {
        self.fields.as_deref()
    }

    /// Requested sort, if any non-empty one was given.
    pub fn sort_spec(&self) -> Option<SortSpec> {
        self.sort
            .as_deref()
            .map(SortSpec::parse)
            .filter(|s| !s.is_empty())
    }

    /// Requested field selection: `name,price` includes, `-password`
    /// excludes. Mixed lists keep the inclusions and drop the exclusions,
    /// except for `_id`, which may always be excluded.
    pub fn field_selection(&self) -> Option<ProjectionSpec> {
        let raw = self.fields.as_deref()?;
        let entries: Vec<(String, Projection)> = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter_map(|part| match part.strip_prefix('-') {
                Some(field) if !field.is_empty() => Some((field.to_string(), Projection::Exclude)),
                Some(_) => None,
                None => Some((part.trim_start_matches('+').to_string(), Projection::Include)),
            })
            .collect();
        let inclusion = entries
            .iter()
            .any(|(_, p)| matches!(p, Projection::Include));
        let entries: Vec<_> = if inclusion {
            entries
                .into_iter()
                .filter(|(f, p)| matches!(p, Projection::Include) || f == "_id")
                .collect()
        } else {
            entries
        };
        (!entries.is_empty()).then_some(entries)
    }

    /// Render a pure conjunction of conditions back into query parameters,
    /// so that translating the result (with identifier coercion on) yields
    /// the same conditions. Returns `None` for trees that have no parameter
    /// form: disjunctions, text search, `exists`, and values whose text form
    /// would be coerced into something else.
    pub fn from_filter(filter: &FilterExpr) -> Option<Self> {
        let mut spec = Self::new();
        for cond in filter.conjunctive_conditions()? {
            let field = cond.field.as_str();
            if is_reserved(field) {
                return None;
            }
            match cond.operator {
                FilterOperator::Eq => {
                    if spec.params.contains_key(field) {
                        return None;
                    }
                    let value = match &cond.value {
                        FieldValue::String(s) if s.contains(',') => return None,
                        FieldValue::Array(_) | FieldValue::Document(_) => return None,
                        other => render_value(field, other, false)?,
                    };
                    spec.params.insert(field.to_string(), value);
                }
                FilterOperator::Exists => return None,
                op => {
                    let mut entries = match spec.params.remove(field) {
                        None => Vec::new(),
                        Some(RawValue::Map(entries)) => entries,
                        Some(_) => return None,
                    };
                    let value = match (op, &cond.value) {
                        (FilterOperator::Regex { .. }, FieldValue::String(pattern)) => {
                            if entries.iter().any(|(k, _)| k == "regex") {
                                return None;
                            }
                            RawValue::Text(pattern.clone())
                        }
                        (FilterOperator::Regex { .. }, _) => return None,
                        (FilterOperator::In | FilterOperator::Nin, FieldValue::Array(_)) => {
                            render_value(field, &cond.value, false)?
                        }
                        (FilterOperator::In | FilterOperator::Nin, _) => return None,
                        (op, value) => render_value(field, value, op.is_range())?,
                    };
                    entries.push((op.keyword().to_string(), value));
                    if let FilterOperator::Regex {
                        case_insensitive: false,
                    } = op
                    {
                        entries.push(("options".to_string(), RawValue::text("")));
                    }
                    spec.params.insert(field.to_string(), RawValue::Map(entries));
                }
            }
        }
        Some(spec)
    }
}

/// Parameter form of an already-coerced value, or `None` when translation
/// would coerce the text differently.
fn render_value(field: &str, value: &FieldValue, range: bool) -> Option<RawValue> {
    match value {
        FieldValue::String(s) => {
            let ambiguous = parse_bool(s).is_some()
                || (is_identifier_field(field) && DocumentId::is_valid(s))
                || (range && (parse_number(s).is_some() || parse_date(s).is_some()));
            (!ambiguous).then(|| RawValue::Text(s.clone()))
        }
        FieldValue::Id(id) => is_identifier_field(field).then(|| RawValue::Text(id.to_hex())),
        FieldValue::Date(d) if range => Some(RawValue::Text(
            d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
        FieldValue::Array(items) => items
            .iter()
            .map(|item| render_value(field, item, false))
            .collect::<Option<Vec<_>>>()
            .map(RawValue::List),
        FieldValue::Document(_) => None,
        other => Some(RawValue::Literal(other.clone())),
    }
}

/// `price[gte]` -> `("price", "gte")`.
fn split_bracket_key(key: &str) -> Option<(&str, &str)> {
    let (field, rest) = key.split_once('[')?;
    let op = rest.strip_suffix(']')?;
    (!field.is_empty() && !op.is_empty()).then_some((field, op))
}
