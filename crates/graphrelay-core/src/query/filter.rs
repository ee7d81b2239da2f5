//! Filter and order descriptors attached to connection queries.
//!
//! Filters are evaluated client-side against resolved items whenever the
//! pushdown planner cannot hand them to the backend in full.

use chrono::{DateTime, Utc};
use graphrelay_common::{Edge, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringFilter {
    pub eq: Option<String>,
    pub ne: Option<String>,
    pub contains: Option<String>,
    pub not_contains: Option<String>,
    pub begins_with: Option<String>,
    pub begins_with_any: Option<Vec<String>>,
    #[serde(rename = "in")]
    pub in_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdFilter {
    pub eq: Option<String>,
    pub ne: Option<String>,
    #[serde(rename = "in")]
    pub in_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumFilter {
    pub eq: Option<String>,
    pub ne: Option<String>,
    #[serde(rename = "in")]
    pub in_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntFilter {
    pub eq: Option<i64>,
    pub ne: Option<i64>,
    pub gt: Option<i64>,
    pub ge: Option<i64>,
    pub lt: Option<i64>,
    pub le: Option<i64>,
    #[serde(rename = "in")]
    pub in_values: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatFilter {
    pub eq: Option<f64>,
    pub ne: Option<f64>,
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoolFilter {
    pub eq: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateTimeFilter {
    pub eq: Option<DateTime<Utc>>,
    pub ne: Option<DateTime<Utc>>,
    pub gt: Option<DateTime<Utc>>,
    pub ge: Option<DateTime<Utc>>,
    pub lt: Option<DateTime<Utc>>,
    pub le: Option<DateTime<Utc>>,
}

/// A typed condition on one property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFilter {
    String(StringFilter),
    Id(IdFilter),
    Enum(EnumFilter),
    Int(IntFilter),
    Float(FloatFilter),
    Bool(BoolFilter),
    DateTime(DateTimeFilter),
}

/// One `and`-ed condition of a [`Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterItem {
    pub property: String,
    pub filter: ValueFilter,
}

/// Conjunction of `items`, at least one of `or` (when non-empty), and not `not`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub items: Vec<FilterItem>,
    pub or: Vec<Filter>,
    pub not: Option<Box<Filter>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub property: String,
    pub direction: SortDirection,
}

/// Requested ordering. Only single-property orders can be served.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self::default().then(property, SortDirection::Ascending)
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::default().then(property, SortDirection::Descending)
    }

    pub fn then(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.items.push(OrderItem {
            property: property.into(),
            direction,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Items a [`Filter`] can be evaluated against.
pub trait Filterable {
    /// Value of `property`, including the item's identity fields.
    fn filter_value(&self, property: &str) -> Option<Value>;
}

impl Filterable for Node {
    fn filter_value(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::String(self.id.clone())),
            _ => self.property(property).cloned(),
        }
    }
}

impl Filterable for Edge {
    fn filter_value(&self, property: &str) -> Option<Value> {
        match property {
            "in_id" => Some(Value::String(self.in_id.clone())),
            "out_id" => Some(Value::String(self.out_id.clone())),
            _ => self.property(property).cloned(),
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: impl Into<String>, filter: ValueFilter) -> Self {
        self.items.push(FilterItem {
            property: property.into(),
            filter,
        });
        self
    }

    pub fn with_or(mut self, alternative: Filter) -> Self {
        self.or.push(alternative);
        self
    }

    pub fn with_not(mut self, negated: Filter) -> Self {
        self.not = Some(Box::new(negated));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.or.is_empty() && self.not.is_none()
    }

    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        let items_match = self
            .items
            .iter()
            .all(|i| i.filter.matches(item.filter_value(&i.property).as_ref()));
        let or_match = self.or.is_empty() || self.or.iter().any(|f| f.matches(item));
        let not_match = self.not.as_ref().map_or(true, |f| !f.matches(item));
        items_match && or_match && not_match
    }
}

impl ValueFilter {
    /// Number of operators set on this filter.
    pub fn operator_count(&self) -> usize {
        fn n<T>(v: &Option<T>) -> usize {
            usize::from(v.is_some())
        }
        match self {
            Self::String(f) => {
                n(&f.eq)
                    + n(&f.ne)
                    + n(&f.contains)
                    + n(&f.not_contains)
                    + n(&f.begins_with)
                    + n(&f.begins_with_any)
                    + n(&f.in_values)
            }
            Self::Id(f) => n(&f.eq) + n(&f.ne) + n(&f.in_values),
            Self::Enum(f) => n(&f.eq) + n(&f.ne) + n(&f.in_values),
            Self::Int(f) => {
                n(&f.eq) + n(&f.ne) + n(&f.gt) + n(&f.ge) + n(&f.lt) + n(&f.le) + n(&f.in_values)
            }
            Self::Float(f) => n(&f.eq) + n(&f.ne) + n(&f.gt) + n(&f.ge) + n(&f.lt) + n(&f.le),
            Self::Bool(f) => n(&f.eq),
            Self::DateTime(f) => n(&f.eq) + n(&f.ne) + n(&f.gt) + n(&f.ge) + n(&f.lt) + n(&f.le),
        }
    }

    /// Evaluates every set operator against `value`; a missing value only satisfies negations.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Self::String(f) => match_string(f, value.and_then(Value::as_str)),
            Self::Id(f) => match_keyword(&f.eq, &f.ne, &f.in_values, value.and_then(Value::as_str)),
            Self::Enum(f) => match_keyword(&f.eq, &f.ne, &f.in_values, value.and_then(Value::as_str)),
            Self::Int(f) => match_int(f, value.and_then(Value::as_i64)),
            Self::Float(f) => match_float(f, value.and_then(Value::as_f64)),
            Self::Bool(f) => f.eq.map_or(true, |eq| value.and_then(Value::as_bool) == Some(eq)),
            Self::DateTime(f) => match_datetime(f, value.and_then(parse_datetime)),
        }
    }
}

fn match_string(f: &StringFilter, value: Option<&str>) -> bool {
    if let Some(eq) = &f.eq {
        if value != Some(eq.as_str()) {
            return false;
        }
    }
    if let Some(ne) = &f.ne {
        if value == Some(ne.as_str()) {
            return false;
        }
    }
    if let Some(needle) = &f.contains {
        if !value.map_or(false, |v| v.contains(needle.as_str())) {
            return false;
        }
    }
    if let Some(needle) = &f.not_contains {
        if value.map_or(false, |v| v.contains(needle.as_str())) {
            return false;
        }
    }
    if let Some(prefix) = &f.begins_with {
        if !value.map_or(false, |v| v.starts_with(prefix.as_str())) {
            return false;
        }
    }
    if let Some(prefixes) = &f.begins_with_any {
        if !value.map_or(false, |v| prefixes.iter().any(|p| v.starts_with(p.as_str()))) {
            return false;
        }
    }
    if let Some(values) = &f.in_values {
        if !value.map_or(false, |v| values.iter().any(|c| c == v)) {
            return false;
        }
    }
    true
}

fn match_keyword(
    eq: &Option<String>,
    ne: &Option<String>,
    in_values: &Option<Vec<String>>,
    value: Option<&str>,
) -> bool {
    eq.as_deref().map_or(true, |eq| value == Some(eq))
        && ne.as_deref().map_or(true, |ne| value != Some(ne))
        && in_values
            .as_ref()
            .map_or(true, |values| value.map_or(false, |v| values.iter().any(|c| c == v)))
}

fn match_int(f: &IntFilter, value: Option<i64>) -> bool {
    let Some(v) = value else {
        return f.eq.is_none()
            && f.gt.is_none()
            && f.ge.is_none()
            && f.lt.is_none()
            && f.le.is_none()
            && f.in_values.is_none();
    };
    f.eq.map_or(true, |x| v == x)
        && f.ne.map_or(true, |x| v != x)
        && f.gt.map_or(true, |x| v > x)
        && f.ge.map_or(true, |x| v >= x)
        && f.lt.map_or(true, |x| v < x)
        && f.le.map_or(true, |x| v <= x)
        && f.in_values.as_ref().map_or(true, |values| values.contains(&v))
}

fn match_float(f: &FloatFilter, value: Option<f64>) -> bool {
    let Some(v) = value else {
        return f.eq.is_none() && f.gt.is_none() && f.ge.is_none() && f.lt.is_none() && f.le.is_none();
    };
    f.eq.map_or(true, |x| v == x)
        && f.ne.map_or(true, |x| v != x)
        && f.gt.map_or(true, |x| v > x)
        && f.ge.map_or(true, |x| v >= x)
        && f.lt.map_or(true, |x| v < x)
        && f.le.map_or(true, |x| v <= x)
}

fn match_datetime(f: &DateTimeFilter, value: Option<DateTime<Utc>>) -> bool {
    let Some(v) = value else {
        return f.eq.is_none() && f.gt.is_none() && f.ge.is_none() && f.lt.is_none() && f.le.is_none();
    };
    f.eq.map_or(true, |x| v == x)
        && f.ne.map_or(true, |x| v != x)
        && f.gt.map_or(true, |x| v > x)
        && f.ge.map_or(true, |x| v >= x)
        && f.lt.map_or(true, |x| v < x)
        && f.le.map_or(true, |x| v <= x)
}

pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
