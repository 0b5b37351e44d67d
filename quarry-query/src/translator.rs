//! Query parameters to filter expressions.
//!
//! [`FilterTranslator`] turns the filter parameters of a [`QuerySpec`] into a
//! [`FilterExpr`]. Translation never fails: unknown operator keys degrade to
//! equality on a nested path, malformed identifiers stay strings and
//! unparseable range values are compared as given.

use crate::query_spec::{QuerySpec, RawValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quarry_core::{Document, FieldValue, FilterExpr, FilterOperator, QueryConfig};
use quarry_storage::IdCodec;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Companion key carrying regex flags (`"i"` = case-insensitive).
pub const REGEX_OPTIONS_KEY: &str = "options";

/// Operator keyword to operator, for the keywords accepted in mappings.
fn operator_for(key: &str) -> Option<FilterOperator> {
    match key {
        "gte" => Some(FilterOperator::Gte),
        "gt" => Some(FilterOperator::Gt),
        "lte" => Some(FilterOperator::Lte),
        "lt" => Some(FilterOperator::Lt),
        "in" => Some(FilterOperator::In),
        "nin" => Some(FilterOperator::Nin),
        "ne" => Some(FilterOperator::Ne),
        "regex" => Some(FilterOperator::Regex {
            case_insensitive: true,
        }),
        _ => None,
    }
}

/// Whether a field holds identifiers.
///
/// This is a naming heuristic: any field whose lowercase name contains `id`
/// qualifies (`_id`, `userId`, `orderIds`, also `paid`). It lives here alone
/// so it can be replaced by per-field schema information.
pub fn is_identifier_field(field: &str) -> bool {
    field.to_lowercase().contains("id")
}

/// `"true"` / `"false"` in any case.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Integer, then finite float.
pub(crate) fn parse_number(s: &str) -> Option<FieldValue> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(FieldValue::Int(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(FieldValue::Float)
}

/// Date-time layouts with an offset; `%z` takes `+01:00` and `+0100`.
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// ISO-8601 date or date-time, seconds optional. Values without an offset
/// are taken as UTC.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(s, f).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn split_list(s: &str) -> Vec<&str> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Translates query parameters into filter expressions.
pub struct FilterTranslator<'a, C: IdCodec + ?Sized> {
    codec: &'a C,
    coerce_identifiers: bool,
    allowed_fields: Option<BTreeSet<String>>,
}

impl<'a, C: IdCodec + ?Sized> FilterTranslator<'a, C> {
    /// Free-form translator with identifier coercion on.
    pub fn new(codec: &'a C) -> Self {
        Self {
            codec,
            coerce_identifiers: true,
            allowed_fields: None,
        }
    }

    pub fn with_config(codec: &'a C, config: &QueryConfig) -> Self {
        Self::new(codec).coerce_identifiers(config.coerce_identifiers)
    }

    pub fn coerce_identifiers(mut self, enabled: bool) -> Self {
        self.coerce_identifiers = enabled;
        self
    }

    /// Restrict translation to `fields`. Parameters on other fields are
    /// dropped.
    pub fn with_allowed_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.allowed_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    fn is_allowed(&self, field: &str) -> bool {
        self.allowed_fields
            .as_ref()
            .map_or(true, |allowed| allowed.contains(field))
    }

    /// Translate the filter parameters and `search` key of `spec`.
    ///
    /// An empty spec yields the always-true filter.
    pub fn translate(&self, spec: &QuerySpec) -> FilterExpr {
        let mut clauses = Vec::new();
        for (field, raw) in spec.params() {
            if !self.is_allowed(field) {
                debug!(field, "Dropping filter on field outside whitelist");
                continue;
            }
            clauses.push(self.translate_field(field, raw));
        }

        let mut filter = FilterExpr::all(clauses);
        if let Some(search) = spec.search().map(str::trim).filter(|s| !s.is_empty()) {
            filter = filter.and(FilterExpr::text(search));
        }
        trace!(?filter, "Translated query filter");
        filter
    }

    fn translate_field(&self, field: &str, raw: &RawValue) -> FilterExpr {
        match raw {
            RawValue::Map(entries) => self.translate_operators(field, entries),
            RawValue::Text(s) if s.contains(',') => {
                let members: Vec<FieldValue> = split_list(s)
                    .into_iter()
                    .map(|part| self.coerce_scalar(field, part))
                    .collect();
                if members.is_empty() {
                    FilterExpr::eq(field, self.coerce_scalar(field, s))
                } else {
                    FilterExpr::in_list(field, members)
                }
            }
            RawValue::List(items) => FilterExpr::in_list(
                field,
                items.iter().map(|item| self.coerce_member(field, item)).collect(),
            ),
            other => FilterExpr::eq(field, self.coerce_member(field, other)),
        }
    }

    fn translate_operators(&self, field: &str, entries: &[(String, RawValue)]) -> FilterExpr {
        let has_regex = entries.iter().any(|(k, _)| k == "regex");
        let case_insensitive = entries
            .iter()
            .find(|(k, _)| k == REGEX_OPTIONS_KEY)
            .map(|(_, v)| raw_text(v).contains('i'))
            .unwrap_or(true);

        let mut clauses = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let clause = match operator_for(key) {
                Some(FilterOperator::Regex { .. }) => {
                    FilterExpr::regex(field, raw_text(value), case_insensitive)
                }
                Some(op @ (FilterOperator::In | FilterOperator::Nin)) => {
                    FilterExpr::condition(field, op, self.coerce_set(field, value))
                }
                Some(op) if op.is_range() => {
                    FilterExpr::condition(field, op, self.coerce_range(field, value))
                }
                Some(op) => FilterExpr::condition(field, op, self.coerce_member(field, value)),
                None if key == REGEX_OPTIONS_KEY && has_regex => continue,
                None => {
                    let path = format!("{}.{}", field, key);
                    debug!(field, key = key.as_str(), "Unknown operator key, using equality");
                    match value {
                        RawValue::Map(nested) => self.translate_operators(&path, nested),
                        other => FilterExpr::eq(path.as_str(), self.coerce_member(&path, other)),
                    }
                }
            };
            clauses.push(clause);
        }
        FilterExpr::all(clauses)
    }

    /// Coerce a query-string scalar: identifier, then boolean, else string.
    ///
    /// The only place the identifier heuristic is applied.
    pub fn coerce_scalar(&self, field: &str, value: &str) -> FieldValue {
        if self.coerce_identifiers && is_identifier_field(field) && self.codec.is_valid_id(value) {
            if let Some(id) = self.codec.to_id(value) {
                return FieldValue::Id(id);
            }
        }
        match parse_bool(value) {
            Some(b) => FieldValue::Bool(b),
            None => FieldValue::String(value.to_string()),
        }
    }

    /// Range operand: identifier, number, date, else as a scalar.
    fn coerce_range(&self, field: &str, raw: &RawValue) -> FieldValue {
        match raw {
            RawValue::Text(s) => {
                if let FieldValue::Id(id) = self.coerce_scalar(field, s) {
                    return FieldValue::Id(id);
                }
                parse_number(s)
                    .or_else(|| parse_date(s).map(FieldValue::Date))
                    .unwrap_or_else(|| self.coerce_scalar(field, s))
            }
            other => self.coerce_member(field, other),
        }
    }

    /// Set operand for `in`/`nin`: lists as given, strings split on commas.
    fn coerce_set(&self, field: &str, raw: &RawValue) -> FieldValue {
        let members = match raw {
            RawValue::List(items) => items
                .iter()
                .map(|item| self.coerce_member(field, item))
                .collect(),
            RawValue::Text(s) => split_list(s)
                .into_iter()
                .map(|part| self.coerce_scalar(field, part))
                .collect(),
            other => vec![self.coerce_member(field, other)],
        };
        FieldValue::Array(members)
    }

    fn coerce_member(&self, field: &str, raw: &RawValue) -> FieldValue {
        match raw {
            RawValue::Text(s) => self.coerce_scalar(field, s),
            RawValue::Literal(v) => v.clone(),
            RawValue::List(items) => FieldValue::Array(
                items.iter().map(|item| self.coerce_member(field, item)).collect(),
            ),
            RawValue::Map(entries) => {
                let doc: Document = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.coerce_member(k, v)))
                    .collect();
                FieldValue::Document(doc)
            }
        }
    }
}

fn raw_text(raw: &RawValue) -> String {
    match raw {
        RawValue::Text(s) => s.clone(),
        RawValue::Literal(FieldValue::String(s)) => s.clone(),
        RawValue::Literal(FieldValue::Null) => String::new(),
        RawValue::Literal(v) => v.to_json().to_string(),
        RawValue::List(items) => items.iter().map(raw_text).collect::<Vec<_>>().join(","),
        RawValue::Map(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quarry_core::DocumentId;
    use quarry_storage::HexIdCodec;
    use serde_json::json;

    const ID: &str = "507f1f77bcf86cd799439011";

    fn translate(value: serde_json::Value) -> FilterExpr {
        let spec = QuerySpec::from_json(value).expect("object");
        FilterTranslator::new(&HexIdCodec).translate(&spec)
    }

    #[test]
    fn test_empty_is_always_true() {
        assert!(translate(json!({})).is_always());
        assert!(translate(json!({"page": "3", "limit": "5", "sort": "name", "fields": "a"}))
            .is_always());
    }

    #[test]
    fn test_range_clause() {
        let f = translate(json!({"price": {"gte": 10, "lte": "20"}}));
        assert_eq!(f, FilterExpr::gte("price", 10).and(FilterExpr::lte("price", 20)));
    }

    #[test]
    fn test_comma_string_becomes_in() {
        let f = translate(json!({"category": "a, b,,c"}));
        assert_eq!(
            f,
            FilterExpr::in_list("category", vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_identifier_coercion() {
        let id = DocumentId::parse_str(ID).expect("valid id");
        assert_eq!(translate(json!({"userId": ID})), FilterExpr::eq("userId", id));
        assert_eq!(
            translate(json!({"userId": "not-an-id"})),
            FilterExpr::eq("userId", "not-an-id")
        );
        // Only fields that look like identifiers are coerced
        assert_eq!(translate(json!({"name": ID})), FilterExpr::eq("name", ID));
    }

    #[test]
    fn test_identifier_coercion_can_be_disabled() {
        let spec = QuerySpec::new().with("userId", ID);
        let f = FilterTranslator::new(&HexIdCodec)
            .coerce_identifiers(false)
            .translate(&spec);
        assert_eq!(f, FilterExpr::eq("userId", ID));
    }

    #[test]
    fn test_identifier_coercion_in_sets() {
        let id = DocumentId::parse_str(ID).expect("valid id");
        let f = translate(json!({"orderId": {"in": [ID, "x"]}}));
        assert_eq!(
            f,
            FilterExpr::in_list("orderId", vec![FieldValue::Id(id), "x".into()])
        );
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(translate(json!({"isActive": "TRUE"})), FilterExpr::eq("isActive", true));
        assert_eq!(translate(json!({"isActive": "false"})), FilterExpr::eq("isActive", false));
        assert_eq!(translate(json!({"note": "truthy"})), FilterExpr::eq("note", "truthy"));
    }

    #[test]
    fn test_regex_defaults_case_insensitive() {
        assert_eq!(
            translate(json!({"name": {"regex": "^jo"}})),
            FilterExpr::regex("name", "^jo", true)
        );
        assert_eq!(
            translate(json!({"name": {"regex": "^Jo", "options": ""}})),
            FilterExpr::regex("name", "^Jo", false)
        );
        assert_eq!(
            translate(json!({"name": {"regex": "^jo", "options": "im"}})),
            FilterExpr::regex("name", "^jo", true)
        );
    }

    #[test]
    fn test_unknown_operator_key_degrades_to_equality() {
        let f = translate(json!({"price": {"gte": 5, "foo": "bar"}}));
        // Operator keys are visited in key order
        assert_eq!(
            f,
            FilterExpr::eq("price.foo", "bar").and(FilterExpr::gte("price", 5))
        );
        // options without regex is just another unknown key
        assert_eq!(
            translate(json!({"name": {"options": "i"}})),
            FilterExpr::eq("name.options", "i")
        );
    }

    #[test]
    fn test_date_coercion_on_ranges_only() {
        let f = translate(json!({"createdAt": {"gte": "2024-01-15"}}));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(f, FilterExpr::gte("createdAt", expected));

        let f = translate(json!({"createdAt": {"lt": "2024-01-15T10:30:00Z"}}));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(f, FilterExpr::lt("createdAt", expected));

        let f = translate(json!({"createdAt": {"gte": "2024-01-15T10:30"}}));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(f, FilterExpr::gte("createdAt", expected));

        let f = translate(json!({"createdAt": {"lte": "2024-01-15T10:30:00+0100"}}));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(f, FilterExpr::lte("createdAt", expected));

        let f = translate(json!({"createdAt": {"lt": "2024-01-15T10:30-0200"}}));
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(f, FilterExpr::lt("createdAt", expected));

        assert_eq!(translate(json!({"day": "2024-01-15"})), FilterExpr::eq("day", "2024-01-15"));
        assert_eq!(
            translate(json!({"name": {"gt": "m"}})),
            FilterExpr::gt("name", "m")
        );
    }

    #[test]
    fn test_search_is_conjoined() {
        let f = translate(json!({"status": "active", "search": "chair"}));
        assert_eq!(
            f,
            FilterExpr::eq("status", "active").and(FilterExpr::text("chair"))
        );
        assert!(translate(json!({"search": "  "})).is_always());
    }

    #[test]
    fn test_whitelist_drops_other_fields() {
        let spec = QuerySpec::new()
            .with("status", "active")
            .with("password", "x");
        let f = FilterTranslator::new(&HexIdCodec)
            .with_allowed_fields(["status"])
            .translate(&spec);
        assert_eq!(f, FilterExpr::eq("status", "active"));
    }

    #[test]
    fn test_list_value_becomes_in() {
        let spec = QuerySpec::from_pairs([("tag", "a"), ("tag", "b")]);
        let f = FilterTranslator::new(&HexIdCodec).translate(&spec);
        assert_eq!(f, FilterExpr::in_list("tag", vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_identifier_heuristic() {
        assert!(is_identifier_field("_id"));
        assert!(is_identifier_field("userId"));
        assert!(is_identifier_field("ORDER_ID"));
        assert!(!is_identifier_field("name"));
    }
}
