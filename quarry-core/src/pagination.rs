//! Pagination calculator.
//!
//! Pure functions from raw page/limit inputs to an effective
//! [`PaginationRequest`], and from `(page, limit, total)` to a
//! [`PaginationResult`]. `PaginationResult` stores only its three inputs;
//! `pages`, `has_next` and `has_prev` are derived on every read.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

/// Defaulting and clamping bounds for raw pagination input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page: u64,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page: DEFAULT_PAGE,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

/// Effective page request: `page >= 1`, `1 <= limit <= max_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationRequest {
    pub page: u64,
    pub limit: u64,
}

impl Default for PaginationRequest {
    fn default() -> Self {
        Self::from_raw(None, None, &PageLimits::default())
    }
}

/// Parse a positive integer. Non-numeric, fractional, zero or negative input
/// yields `None`; digit strings too large for `u64` saturate.
fn parse_positive(raw: Option<&str>) -> Option<u64> {
    let s = raw?.trim();
    let digits = s.strip_prefix('+').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = digits.parse::<u64>().unwrap_or(u64::MAX);
    (n >= 1).then_some(n)
}

impl PaginationRequest {
    /// Build from raw query-string values. Malformed input silently falls
    /// back to the defaults; limits above `max_limit` are clamped.
    pub fn from_raw(page: Option<&str>, limit: Option<&str>, bounds: &PageLimits) -> Self {
        let page = parse_positive(page).unwrap_or(bounds.default_page.max(1));
        let limit = parse_positive(limit)
            .unwrap_or(bounds.default_limit.max(1))
            .min(bounds.max_limit.max(1));
        Self { page, limit }
    }

    /// Build from already-numeric input, applying the same rules.
    pub fn new(page: i64, limit: i64, bounds: &PageLimits) -> Self {
        Self::from_raw(
            Some(&page.to_string()),
            Some(&limit.to_string()),
            bounds,
        )
    }

    /// Number of records to skip: `(page - 1) * limit`.
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Result metadata for this request once the total is known.
    pub fn result(&self, total: u64) -> PaginationResult {
        PaginationResult::new(self.page, self.limit, total)
    }
}

/// Page metadata returned alongside the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationResult {
    page: u64,
    limit: u64,
    total: u64,
}

impl PaginationResult {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        Self { page, limit, total }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `ceil(total / limit)`; 0 when limit is 0.
    pub fn pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit)
    }

    pub fn has_next(&self) -> bool {
        self.page.saturating_mul(self.limit) < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

impl Serialize for PaginationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PaginationResult", 6)?;
        s.serialize_field("page", &self.page)?;
        s.serialize_field("limit", &self.limit)?;
        s.serialize_field("total", &self.total)?;
        s.serialize_field("pages", &self.pages())?;
        s.serialize_field("hasNext", &self.has_next())?;
        s.serialize_field("hasPrev", &self.has_prev())?;
        s.end()
    }
}
