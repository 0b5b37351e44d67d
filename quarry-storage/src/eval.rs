//! In-memory evaluation of filters, expressions and pipeline stages.
//!
//! Document-database semantics apply throughout: scalar predicates match an
//! array field when any element matches, missing fields behave as null, and
//! range comparisons only match values of the same kind.

use quarry_core::{
    get_path, remove_path, set_path, Document, Expr, FieldValue, FilterExpr, FilterOperator,
    JoinSpec, Projection, QuarryResult, QueryError, SortDirection, SortSpec,
};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

// ============================================================================
// FILTER MATCHING
// ============================================================================

/// A filter with its regular expressions compiled once.
#[derive(Debug)]
pub struct Matcher {
    root: Node,
    text_fields: Vec<String>,
}

#[derive(Debug)]
enum Node {
    Condition {
        field: String,
        operator: FilterOperator,
        value: FieldValue,
        regex: Option<Regex>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Text(Vec<String>),
}

impl Matcher {
    /// Compile `filter`. `text_fields` lists the fields covered by text
    /// search; empty means every top-level string (or string array) field.
    pub fn new(filter: &FilterExpr, text_fields: &[String]) -> QuarryResult<Self> {
        Ok(Self {
            root: compile(filter)?,
            text_fields: text_fields.to_vec(),
        })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.eval(&self.root, doc)
    }

    fn eval(&self, node: &Node, doc: &Document) -> bool {
        match node {
            Node::And(children) => children.iter().all(|c| self.eval(c, doc)),
            Node::Or(children) => children.iter().any(|c| self.eval(c, doc)),
            Node::Text(terms) => self.text_matches(terms, doc),
            Node::Condition {
                field,
                operator,
                value,
                regex,
            } => condition_matches(get_path(doc, field), *operator, value, regex.as_ref()),
        }
    }

    fn text_matches(&self, terms: &[String], doc: &Document) -> bool {
        if terms.is_empty() {
            return false;
        }
        let mut haystacks: Vec<String> = Vec::new();
        if self.text_fields.is_empty() {
            for value in doc.values() {
                collect_strings(value, &mut haystacks);
            }
        } else {
            for field in &self.text_fields {
                if let Some(value) = get_path(doc, field) {
                    collect_strings(value, &mut haystacks);
                }
            }
        }
        terms
            .iter()
            .any(|term| haystacks.iter().any(|h| h.contains(term.as_str())))
    }
}

fn collect_strings(value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::String(s) => out.push(s.to_lowercase()),
        FieldValue::Array(items) => {
            for item in items {
                if let FieldValue::String(s) = item {
                    out.push(s.to_lowercase());
                }
            }
        }
        _ => {}
    }
}

fn compile(filter: &FilterExpr) -> QuarryResult<Node> {
    Ok(match filter {
        FilterExpr::And(children) => {
            Node::And(children.iter().map(compile).collect::<QuarryResult<_>>()?)
        }
        FilterExpr::Or(children) => {
            Node::Or(children.iter().map(compile).collect::<QuarryResult<_>>()?)
        }
        FilterExpr::Text(query) => Node::Text(
            query
                .split_whitespace()
                .map(str::to_lowercase)
                .collect(),
        ),
        FilterExpr::Condition(cond) => {
            let regex = match cond.operator {
                FilterOperator::Regex { case_insensitive } => {
                    let pattern = match &cond.value {
                        FieldValue::String(s) => s.clone(),
                        other => other.to_json().to_string(),
                    };
                    let compiled = RegexBuilder::new(&pattern)
                        .case_insensitive(case_insensitive)
                        .build()
                        .map_err(|e| QueryError::InvalidRegex {
                            field: cond.field.clone(),
                            reason: e.to_string(),
                        })?;
                    Some(compiled)
                }
                _ => None,
            };
            Node::Condition {
                field: cond.field.clone(),
                operator: cond.operator,
                value: cond.value.clone(),
                regex,
            }
        }
    })
}

/// Candidates a scalar predicate is tested against: the value itself plus,
/// for arrays, each element.
fn candidates(actual: &FieldValue) -> Vec<&FieldValue> {
    let mut out = vec![actual];
    if let FieldValue::Array(items) = actual {
        out.extend(items.iter());
    }
    out
}

fn equals(actual: Option<&FieldValue>, expected: &FieldValue) -> bool {
    match actual {
        None => expected.is_null(),
        Some(actual) => candidates(actual).iter().any(|c| c.loose_eq(expected)),
    }
}

fn in_set(actual: Option<&FieldValue>, set: &FieldValue) -> bool {
    match set {
        FieldValue::Array(options) => options.iter().any(|o| equals(actual, o)),
        single => equals(actual, single),
    }
}

fn condition_matches(
    actual: Option<&FieldValue>,
    operator: FilterOperator,
    expected: &FieldValue,
    regex: Option<&Regex>,
) -> bool {
    match operator {
        FilterOperator::Eq => equals(actual, expected),
        FilterOperator::Ne => !equals(actual, expected),
        FilterOperator::In => in_set(actual, expected),
        FilterOperator::Nin => !in_set(actual, expected),
        FilterOperator::Exists => {
            let wanted = !matches!(expected, FieldValue::Bool(false));
            actual.is_some() == wanted
        }
        FilterOperator::Regex { .. } => match (actual, regex) {
            (Some(actual), Some(re)) => candidates(actual)
                .iter()
                .any(|c| c.as_str().is_some_and(|s| re.is_match(s))),
            _ => false,
        },
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            let Some(actual) = actual else {
                return false;
            };
            candidates(actual).iter().any(|c| {
                match c.partial_cmp_same_kind(expected) {
                    Some(ord) => match operator {
                        FilterOperator::Gt => ord == Ordering::Greater,
                        FilterOperator::Gte => ord != Ordering::Less,
                        FilterOperator::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            })
        }
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Evaluate a computed-field expression against `doc`.
pub fn evaluate(expr: &Expr, doc: &Document) -> FieldValue {
    match expr {
        Expr::Field(path) => get_path(doc, path).cloned().unwrap_or(FieldValue::Null),
        Expr::Literal(value) => value.clone(),
        Expr::Size(inner) => match evaluate(inner, doc) {
            FieldValue::Array(items) => FieldValue::Int(items.len() as i64),
            _ => FieldValue::Int(0),
        },
        Expr::First(inner) => match evaluate(inner, doc) {
            FieldValue::Array(items) => items.into_iter().next().unwrap_or(FieldValue::Null),
            _ => FieldValue::Null,
        },
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                match evaluate(part, doc) {
                    FieldValue::Null => return FieldValue::Null,
                    FieldValue::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_json().to_string()),
                }
            }
            FieldValue::String(out)
        }
        Expr::Add(parts) => fold_numbers(parts, doc, 0, |a, b| a.checked_add(b), |a, b| a + b),
        Expr::Multiply(parts) => {
            fold_numbers(parts, doc, 1, |a, b| a.checked_mul(b), |a, b| a * b)
        }
        Expr::Subtract(lhs, rhs) => match (evaluate(lhs, doc), evaluate(rhs, doc)) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a
                .checked_sub(b)
                .map(FieldValue::Int)
                .unwrap_or(FieldValue::Float(a as f64 - b as f64)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => FieldValue::Float(x - y),
                _ => FieldValue::Null,
            },
        },
        Expr::Divide(lhs, rhs) => {
            match (evaluate(lhs, doc).as_f64(), evaluate(rhs, doc).as_f64()) {
                (Some(_), Some(y)) if y == 0.0 => FieldValue::Null,
                (Some(x), Some(y)) => FieldValue::Float(x / y),
                _ => FieldValue::Null,
            }
        }
        Expr::IfNull(value, fallback) => match evaluate(value, doc) {
            FieldValue::Null => evaluate(fallback, doc),
            present => present,
        },
    }
}

fn fold_numbers(
    parts: &[Expr],
    doc: &Document,
    identity: i64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> FieldValue {
    let mut acc = FieldValue::Int(identity);
    for part in parts {
        let value = evaluate(part, doc);
        acc = match (&acc, &value) {
            (FieldValue::Int(a), FieldValue::Int(b)) => match int_op(*a, *b) {
                Some(n) => FieldValue::Int(n),
                None => FieldValue::Float(float_op(*a as f64, *b as f64)),
            },
            _ => match (acc.as_f64(), value.as_f64()) {
                (Some(a), Some(b)) => FieldValue::Float(float_op(a, b)),
                _ => return FieldValue::Null,
            },
        };
    }
    acc
}

// ============================================================================
// STAGES
// ============================================================================

/// Apply a projection to one document.
///
/// Any `Include` or `Computed` entry puts the projection in inclusion mode:
/// only listed fields (plus `_id` unless excluded) are kept. A projection
/// made only of `Exclude` entries removes those fields and keeps the rest.
pub fn project(doc: &Document, spec: &[(String, Projection)]) -> Document {
    let inclusion = spec
        .iter()
        .any(|(_, p)| !matches!(p, Projection::Exclude));

    if !inclusion {
        let mut out = doc.clone();
        for (field, _) in spec {
            remove_path(&mut out, field);
        }
        return out;
    }

    let mut out = Document::new();
    let id_excluded = spec
        .iter()
        .any(|(f, p)| f == "_id" && matches!(p, Projection::Exclude));
    if !id_excluded {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (field, projection) in spec {
        match projection {
            Projection::Include => {
                if let Some(value) = get_path(doc, field) {
                    set_path(&mut out, field, value.clone());
                }
            }
            Projection::Computed(expr) => set_path(&mut out, field, evaluate(expr, doc)),
            Projection::Exclude => {}
        }
    }
    out
}

/// Stable sort by every (field, direction) pair in turn. Missing fields sort
/// as null.
pub fn sort_documents(docs: &mut [Document], spec: &SortSpec) {
    if spec.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, direction) in spec.fields() {
            let av = get_path(a, field).unwrap_or(&FieldValue::Null);
            let bv = get_path(b, field).unwrap_or(&FieldValue::Null);
            let ord = av.total_cmp(bv);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply `skip`/`limit` to an owned sequence.
pub fn window(docs: Vec<Document>, skip: u64, limit: Option<u64>) -> Vec<Document> {
    let skipped = docs.into_iter().skip(usize::try_from(skip).unwrap_or(usize::MAX));
    match limit {
        Some(limit) => skipped
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => skipped.collect(),
    }
}

/// Left outer join of `docs` with `foreign`. Owning documents are never
/// dropped.
pub fn join(docs: Vec<Document>, foreign: &[Document], spec: &JoinSpec) -> Vec<Document> {
    docs.into_iter()
        .map(|mut doc| {
            let matched: Vec<FieldValue> = match get_path(&doc, &spec.local_field) {
                None | Some(FieldValue::Null) => Vec::new(),
                Some(local) => {
                    let keys = candidates(local);
                    foreign
                        .iter()
                        .filter(|f| {
                            get_path(f, &spec.foreign_field).is_some_and(|fv| {
                                keys.iter().any(|k| !k.is_null() && fv.loose_eq(k))
                            })
                        })
                        .map(|f| FieldValue::Document(f.clone()))
                        .collect()
                }
            };
            if spec.flatten_single {
                match matched.into_iter().next() {
                    Some(first) => set_path(&mut doc, &spec.as_field, first),
                    None => {
                        remove_path(&mut doc, &spec.as_field);
                    }
                }
            } else {
                set_path(&mut doc, &spec.as_field, FieldValue::Array(matched));
            }
            doc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{document_from_json, DocumentId};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        document_from_json(value).expect("object")
    }

    fn matches(filter: &FilterExpr, d: &Document) -> bool {
        Matcher::new(filter, &[]).expect("compiles").matches(d)
    }

    #[test]
    fn test_always_true_matches_everything() {
        assert!(matches(&FilterExpr::always(), &doc(json!({}))));
    }

    #[test]
    fn test_range_requires_same_kind() {
        let d = doc(json!({ "price": 15 }));
        assert!(matches(&FilterExpr::gte("price", 10).and(FilterExpr::lte("price", 20)), &d));
        assert!(!matches(&FilterExpr::gte("price", "10"), &d));
        assert!(!matches(&FilterExpr::gt("missing", 0), &d));
    }

    #[test]
    fn test_array_field_matches_any_element() {
        let d = doc(json!({ "tags": ["red", "blue"] }));
        assert!(matches(&FilterExpr::eq("tags", "blue"), &d));
        assert!(matches(
            &FilterExpr::in_list("tags", vec!["green".into(), "red".into()]),
            &d
        ));
        assert!(!matches(&FilterExpr::not_in("tags", vec!["red".into()]), &d));
    }

    #[test]
    fn test_regex_case_flag() {
        let d = doc(json!({ "name": "Blue Widget" }));
        assert!(matches(&FilterExpr::regex("name", "widget", true), &d));
        assert!(!matches(&FilterExpr::regex("name", "widget", false), &d));
    }

    #[test]
    fn test_invalid_regex_is_query_error() {
        let err = Matcher::new(&FilterExpr::regex("name", "(", true), &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid regex"));
    }

    #[test]
    fn test_exists_and_null_equality() {
        let d = doc(json!({ "deletedAt": null }));
        assert!(matches(&FilterExpr::exists("deletedAt", true), &d));
        assert!(!matches(&FilterExpr::exists("archivedAt", true), &d));
        assert!(matches(&FilterExpr::eq("archivedAt", FieldValue::Null), &d));
    }

    #[test]
    fn test_text_search_any_term() {
        let d = doc(json!({ "name": "Ergonomic Chair", "sku": "CH-1" }));
        assert!(matches(&FilterExpr::text("chair lamp"), &d));
        assert!(!matches(&FilterExpr::text("lamp"), &d));
        let scoped = Matcher::new(&FilterExpr::text("ch-1"), &["name".to_string()])
            .expect("compiles");
        assert!(!scoped.matches(&d));
    }

    #[test]
    fn test_id_equality() {
        let id = DocumentId::parse_str("507f1f77bcf86cd799439011").expect("valid id");
        let mut d = Document::new();
        d.insert("userId".into(), FieldValue::Id(id));
        assert!(matches(&FilterExpr::eq("userId", id), &d));
        assert!(!matches(&FilterExpr::eq("userId", "507f1f77bcf86cd799439011"), &d));
    }

    #[test]
    fn test_evaluate_expressions() {
        let d = doc(json!({ "items": [{ "qty": 2 }, { "qty": 3 }], "price": 4, "tax": 0.5, "first": "Ada", "last": "Lovelace" }));
        assert_eq!(evaluate(&Expr::size(Expr::field("items")), &d), FieldValue::Int(2));
        assert_eq!(
            evaluate(&Expr::Add(vec![Expr::field("price"), Expr::field("tax")]), &d),
            FieldValue::Float(4.5)
        );
        assert_eq!(
            evaluate(
                &Expr::Concat(vec![Expr::field("first"), Expr::literal(" "), Expr::field("last")]),
                &d
            ),
            FieldValue::from("Ada Lovelace")
        );
        assert_eq!(
            evaluate(&Expr::divide(Expr::field("price"), Expr::literal(0)), &d),
            FieldValue::Null
        );
        assert_eq!(
            evaluate(&Expr::if_null(Expr::field("nickname"), Expr::field("first")), &d),
            FieldValue::from("Ada")
        );
    }

    #[test]
    fn test_projection_modes() {
        let d = doc(json!({ "_id": 1, "name": "a", "password": "x", "profile": { "age": 3 } }));
        let inclusion = project(
            &d,
            &[
                ("name".to_string(), Projection::Include),
                ("age".to_string(), Projection::Computed(Expr::field("profile.age"))),
            ],
        );
        assert_eq!(inclusion, doc(json!({ "_id": 1, "name": "a", "age": 3 })));

        let exclusion = project(&d, &[("password".to_string(), Projection::Exclude)]);
        assert!(!exclusion.contains_key("password"));
        assert!(exclusion.contains_key("profile"));
    }

    #[test]
    fn test_sort_multi_key() {
        let mut docs = vec![
            doc(json!({ "n": "b", "p": 1 })),
            doc(json!({ "n": "a", "p": 1 })),
            doc(json!({ "n": "c", "p": 2 })),
        ];
        sort_documents(&mut docs, &SortSpec::new().descending("p").ascending("n"));
        let names: Vec<_> = docs
            .iter()
            .map(|d| d.get("n").and_then(FieldValue::as_str).unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_join_flatten_keeps_unmatched() {
        let orders = vec![
            doc(json!({ "_id": 1, "userId": 10 })),
            doc(json!({ "_id": 2, "userId": 99 })),
        ];
        let users = vec![doc(json!({ "_id": 10, "name": "Ada" }))];
        let joined = join(orders, &users, &JoinSpec::new("users", "userId", "_id", "user").single());
        assert_eq!(joined.len(), 2);
        assert_eq!(
            get_path(&joined[0], "user.name").and_then(FieldValue::as_str),
            Some("Ada")
        );
        assert!(!joined[1].contains_key("user"));
    }

    #[test]
    fn test_join_without_flatten_yields_arrays() {
        let users = vec![doc(json!({ "_id": 10 }))];
        let orders = vec![
            doc(json!({ "userId": 10, "total": 5 })),
            doc(json!({ "userId": 10, "total": 7 })),
        ];
        let joined = join(users, &orders, &JoinSpec::new("orders", "_id", "userId", "orders"));
        assert_eq!(
            joined[0].get("orders").and_then(FieldValue::as_array).map(<[_]>::len),
            Some(2)
        );
    }

    #[test]
    fn test_window() {
        let docs: Vec<Document> = (0..12).map(|i| doc(json!({ "i": i }))).collect();
        let page = window(docs, 10, Some(5));
        assert_eq!(page.len(), 2);
    }
}
