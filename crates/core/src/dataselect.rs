//! Selection directives for list fetches: sort, filter, paginate, and whether to attach metrics.
//!
//! Query strings follow the dashboard layout: `--sort a,name,d,creationTimestamp` is a flat list
//! of `(direction, property)` pairs and `--filter name,web` a flat list of `(property, value)` pairs.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Event, PodSummary};

pub const NAME: &str = "name";
pub const NAMESPACE: &str = "namespace";
pub const CREATION_TIMESTAMP: &str = "creationTimestamp";
pub const STATUS: &str = "status";
pub const RESTARTS: &str = "restarts";
pub const NODE: &str = "node";
pub const REASON: &str = "reason";
pub const TYPE: &str = "type";
pub const FIRST_SEEN: &str = "firstSeen";
pub const LAST_SEEN: &str = "lastSeen";

/// Properties compared by substring when filtering; everything else must match exactly.
const SUBSTRING_PROPERTIES: [&str; 3] = [NAME, NAMESPACE, STATUS];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectParseError {
    #[error("expected property/value pairs, got odd number of tokens in {0:?}")]
    Unpaired(String),
    #[error("invalid sort direction {0:?} (expect a or d)")]
    Direction(String),
}

/// A property value that can be ordered against values of the same variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparableValue {
    Str(String),
    Int(i64),
    Time(DateTime<Utc>),
}

impl ComparableValue {
    fn compare(&self, other: &ComparableValue) -> Ordering {
        match (self, other) {
            (ComparableValue::Str(a), ComparableValue::Str(b)) => a.cmp(b),
            (ComparableValue::Int(a), ComparableValue::Int(b)) => a.cmp(b),
            (ComparableValue::Time(a), ComparableValue::Time(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    fn render(&self) -> String {
        match self {
            ComparableValue::Str(s) => s.clone(),
            ComparableValue::Int(i) => i.to_string(),
            ComparableValue::Time(t) => t.to_rfc3339(),
        }
    }
}

/// Items that expose named properties to the selection engine.
pub trait DataCell {
    fn property(&self, name: &str) -> Option<ComparableValue>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortBy {
    pub property: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortQuery {
    pub by: Vec<SortBy>,
}

impl SortQuery {
    pub fn parse(raw: &str) -> Result<Self, SelectParseError> {
        let mut by = Vec::new();
        for (dir, property) in pairs(raw)? {
            let ascending = match dir {
                "a" => true,
                "d" => false,
                other => return Err(SelectParseError::Direction(other.to_string())),
            };
            by.push(SortBy { property: property.to_string(), ascending });
        }
        Ok(Self { by })
    }

    fn compare<T: DataCell>(&self, a: &T, b: &T) -> Ordering {
        for s in &self.by {
            let ord = match (a.property(&s.property), b.property(&s.property)) {
                (Some(x), Some(y)) => x.compare(&y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = if s.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterBy {
    pub property: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterQuery {
    pub by: Vec<FilterBy>,
}

impl FilterQuery {
    pub fn parse(raw: &str) -> Result<Self, SelectParseError> {
        let by = pairs(raw)?
            .into_iter()
            .map(|(property, value)| FilterBy { property: property.to_string(), value: value.to_string() })
            .collect();
        Ok(Self { by })
    }

    fn matches<T: DataCell>(&self, item: &T) -> bool {
        self.by.iter().all(|f| match item.property(&f.property) {
            Some(v) if SUBSTRING_PROPERTIES.contains(&f.property.as_str()) => v.render().contains(&f.value),
            Some(v) => v.render() == f.value,
            None => false,
        })
    }
}

/// Zero-based page of fixed size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationQuery {
    pub items_per_page: usize,
    pub page: usize,
}

impl PaginationQuery {
    pub fn new(items_per_page: usize, page: usize) -> Self {
        Self { items_per_page, page }
    }

    /// Index range of this page within `total` items; empty when out of range.
    pub fn range(&self, total: usize) -> Range<usize> {
        let start = self.items_per_page.saturating_mul(self.page).min(total);
        let end = start.saturating_add(self.items_per_page).min(total);
        start..end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricQuery {
    pub metric_names: Vec<String>,
}

impl MetricQuery {
    pub fn standard() -> Self {
        Self { metric_names: vec!["cpu".to_string(), "memory".to_string()] }
    }
}

/// Sort, filter, paginate, and optionally request metrics for a list fetch.
/// The default query leaves the source order untouched and returns everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSelectQuery {
    pub pagination: Option<PaginationQuery>,
    pub sort: SortQuery,
    pub filter: FilterQuery,
    pub metrics: Option<MetricQuery>,
}

impl DataSelectQuery {
    pub fn default_with_metrics() -> Self {
        Self { metrics: Some(MetricQuery::standard()), ..Default::default() }
    }

    pub fn wants_metrics(&self) -> bool {
        self.metrics.as_ref().map(|m| !m.metric_names.is_empty()).unwrap_or(false)
    }
}

/// Page of selected items plus the filtered (pre-pagination) count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected<T> {
    pub items: Vec<T>,
    pub total_items: usize,
}

/// Apply filter, then stable sort, then pagination.
pub fn select<T: DataCell>(items: Vec<T>, query: &DataSelectQuery) -> Selected<T> {
    let mut items: Vec<T> = items.into_iter().filter(|i| query.filter.matches(i)).collect();
    if !query.sort.by.is_empty() {
        items.sort_by(|a, b| query.sort.compare(a, b));
    }
    let total_items = items.len();
    if let Some(p) = query.pagination {
        let r = p.range(total_items);
        items = items.into_iter().skip(r.start).take(r.len()).collect();
    }
    Selected { items, total_items }
}

fn pairs(raw: &str) -> Result<Vec<(&str, &str)>, SelectParseError> {
    let tokens: Vec<&str> = raw.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
    if tokens.len() % 2 != 0 {
        return Err(SelectParseError::Unpaired(raw.to_string()));
    }
    Ok(tokens.chunks(2).map(|c| (c[0], c[1])).collect())
}

fn str_value(s: &str) -> Option<ComparableValue> {
    Some(ComparableValue::Str(s.to_string()))
}

impl DataCell for PodSummary {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            NAME => str_value(&self.object_meta.name),
            NAMESPACE => self.object_meta.namespace.as_deref().and_then(str_value),
            CREATION_TIMESTAMP => self.object_meta.creation_timestamp.map(ComparableValue::Time),
            STATUS => str_value(&self.status),
            RESTARTS => Some(ComparableValue::Int(self.restart_count as i64)),
            NODE => self.node_name.as_deref().and_then(str_value),
            _ => None,
        }
    }
}

impl DataCell for Event {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            NAME => str_value(&self.object_meta.name),
            NAMESPACE => self.object_meta.namespace.as_deref().and_then(str_value),
            CREATION_TIMESTAMP => self.object_meta.creation_timestamp.map(ComparableValue::Time),
            REASON => str_value(&self.reason),
            TYPE => str_value(&self.type_),
            FIRST_SEEN => self.first_seen.map(ComparableValue::Time),
            LAST_SEEN => self.last_seen.map(ComparableValue::Time),
            _ => None,
        }
    }
}
