//! Filtering, sorting, and cursor pagination for list queries
//!
//! Cursors are opaque to clients: a base64-encoded JSON document holding the
//! last row's sort-key value and primary key. Sort keys are always stable
//! because the primary key is the implicit tiebreaker.

use crate::domain::identifiers::SuiteId;
use crate::{Error, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Per-field comparison operators supported by list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality
    Eq,
    /// Set membership; the filter value is an array
    In,
    /// Case-insensitive substring match
    Contains,
    /// Greater-or-equal range bound
    Gte,
    /// Less-or-equal range bound
    Lte,
    /// Pairwise field inequality; the filter value names the other field
    NeField,
}

/// One filter predicate over a named field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort specification; the primary key is always appended as tiebreaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            field: "created_at".to_string(),
            direction: SortDirection::Asc,
        }
    }
}

/// Fields suites may be filtered and sorted by
pub const SUITE_FIELDS: &[&str] = &[
    "name",
    "version",
    "created_at",
    "updated_at",
    "created_by",
    "updated_by",
];

/// Validate a field name against the allowlist
pub fn require_suite_field(field: &str) -> Result<()> {
    if SUITE_FIELDS.contains(&field) {
        Ok(())
    } else {
        Err(Error::invalid(format!("unknown filter field {field}")))
    }
}

/// A list query: filters, sort, opaque cursor, page size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Sort::default(),
            cursor: None,
            limit: default_limit(),
        }
    }
}

impl ListQuery {
    /// Validate field names and the cursor shape up front
    pub fn validated(self) -> Result<Self> {
        require_suite_field(&self.sort.field)?;
        for filter in &self.filters {
            require_suite_field(&filter.field)?;
            if filter.op == FilterOp::NeField {
                let other = filter.value.as_str().ok_or_else(|| {
                    Error::invalid("ne_field filter value must name another field")
                })?;
                require_suite_field(other)?;
            }
        }
        if self.limit == 0 || self.limit > 500 {
            return Err(Error::invalid("limit must be between 1 and 500"));
        }
        Ok(self)
    }
}

/// Decoded cursor position: last seen (sort value, primary key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub last: serde_json::Value,
    pub id: SuiteId,
}

impl CursorPosition {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(cursor: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|_| Error::invalid("malformed cursor"))?;
        serde_json::from_slice(&bytes).map_err(|_| Error::invalid("malformed cursor"))
    }
}

/// One page of results with the cursor to fetch the next page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Total order over JSON scalars used for sort keys: null < numbers <
/// strings; strings compare case-sensitively (timestamps are RFC 3339 and
/// order correctly as text)
pub fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> std::cmp::Ordering {
    use serde_json::Value;
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Evaluate one filter against extracted field values
pub fn matches_filter(
    filter: &Filter,
    field_value: &serde_json::Value,
    other_field_value: Option<&serde_json::Value>,
) -> bool {
    use serde_json::Value;
    match filter.op {
        FilterOp::Eq => field_value == &filter.value,
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|set| set.contains(field_value)),
        FilterOp::Contains => match (field_value, &filter.value) {
            (Value::String(haystack), Value::String(needle)) => {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        FilterOp::Gte => compare_values(field_value, &filter.value).is_ge(),
        FilterOp::Lte => compare_values(field_value, &filter.value).is_le(),
        FilterOp::NeField => other_field_value.is_some_and(|other| field_value != other),
    }
}
