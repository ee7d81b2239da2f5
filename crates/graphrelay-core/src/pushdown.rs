//! Filter/order pushdown planning.
//!
//! Decides which part of a query's filter and order the backend range query
//! can serve natively. Whatever is left is evaluated client-side by the
//! executors (post-filtering).

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::query::filter::{parse_datetime, Filter, Order, SortDirection, ValueFilter};
use crate::schema::{GraphSchema, TypeSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushdownOperator {
    Equals,
    BeginsWith,
    BeginsWithAny,
}

/// Declared type of a pushed-down operand; decides how stored values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// Strings, ids and enums, compared verbatim.
    Text,
    Int,
    Bool,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushdownFilter {
    pub property: String,
    pub operator: PushdownOperator,
    pub kind: NativeKind,
    /// Operand(s) in the backend's native string form.
    pub values: Vec<String>,
}

impl PushdownFilter {
    /// Whether a stored native value satisfies this filter.
    pub fn accepts(&self, native: Option<&str>) -> bool {
        let Some(native) = native else {
            return false;
        };
        match self.operator {
            PushdownOperator::Equals => self.values.iter().any(|v| v == native),
            PushdownOperator::BeginsWith | PushdownOperator::BeginsWithAny => {
                self.values.iter().any(|v| native.starts_with(v.as_str()))
            }
        }
    }

    /// Like [`accepts`](Self::accepts) for a stored property value, encoded as this filter's kind.
    pub fn accepts_value(&self, stored: Option<&Value>) -> bool {
        let native = stored.and_then(|v| native_value_as(v, self.kind));
        self.accepts(native.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushdownOrder {
    pub property: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushdownQueryData {
    pub order: Option<PushdownOrder>,
    pub filter: Option<PushdownFilter>,
    /// Some part of the filter still has to be evaluated client-side.
    pub post_filter_required: bool,
}

/// Planner for node type scans.
pub struct NodePushdown<'a> {
    schema: &'a GraphSchema,
}

impl<'a> NodePushdown<'a> {
    pub fn new(schema: &'a GraphSchema) -> Self {
        Self { schema }
    }

    pub fn try_get_pushdown_query_data(
        &self,
        type_name: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<PushdownQueryData> {
        plan(self.schema.node_type(type_name), type_name, filter, order)
    }
}

/// Planner for edge range queries.
pub struct EdgePushdown<'a> {
    schema: &'a GraphSchema,
}

impl<'a> EdgePushdown<'a> {
    pub fn new(schema: &'a GraphSchema) -> Self {
        Self { schema }
    }

    pub fn try_get_pushdown_query_data(
        &self,
        edge_type: &str,
        filter: Option<&Filter>,
        order: Option<&Order>,
    ) -> Result<PushdownQueryData> {
        plan(self.schema.edge_type(edge_type), edge_type, filter, order)
    }
}

fn plan(
    type_schema: Option<&TypeSchema>,
    type_name: &str,
    filter: Option<&Filter>,
    order: Option<&Order>,
) -> Result<PushdownQueryData> {
    let queryable = |property: &str| type_schema.map_or(false, |t| t.is_queryable(property));

    let order = match order.map(|o| o.items.as_slice()) {
        None | Some([]) => None,
        Some([item]) => {
            if !queryable(&item.property) {
                return Err(GraphError::not_supported(format!(
                    "cannot order {} by non-queryable property '{}'",
                    type_name, item.property
                )));
            }
            Some(PushdownOrder {
                property: item.property.clone(),
                direction: item.direction,
            })
        }
        Some(_) => return Err(GraphError::operation("ambiguous order")),
    };

    let filter = filter.filter(|f| !f.is_empty());
    let Some(filter) = filter else {
        return Ok(PushdownQueryData {
            order,
            filter: None,
            post_filter_required: false,
        });
    };

    let candidate = filter
        .items
        .iter()
        .find(|item| native_operator(&item.filter).is_some() && queryable(&item.property));

    let pushed = match candidate {
        Some(item) if order.as_ref().map_or(true, |o| o.property == item.property) => {
            let values = get_property_values(&item.filter)?;
            match native_operator(&item.filter) {
                Some(operator) if !values.is_empty() => Some((
                    item,
                    PushdownFilter {
                        property: item.property.clone(),
                        operator,
                        kind: native_kind(&item.filter),
                        values,
                    },
                )),
                _ => None,
            }
        }
        _ => None,
    };

    let fully_pushed = matches!(&pushed, Some((item, _))
        if filter.items.len() == 1
            && filter.or.is_empty()
            && filter.not.is_none()
            && item.filter.operator_count() == 1);

    tracing::debug!(
        "Pushdown for {}: order={:?} filter={:?} post_filter={}",
        type_name,
        order,
        pushed.as_ref().map(|(_, f)| f),
        !fully_pushed
    );

    Ok(PushdownQueryData {
        order,
        filter: pushed.map(|(_, f)| f),
        post_filter_required: !fully_pushed,
    })
}

/// The native operator a value filter would be pushed down with, in precedence order.
fn native_operator(filter: &ValueFilter) -> Option<PushdownOperator> {
    match filter {
        ValueFilter::String(f) => {
            if f.eq.is_some() {
                Some(PushdownOperator::Equals)
            } else if f.begins_with.is_some() {
                Some(PushdownOperator::BeginsWith)
            } else if f.begins_with_any.is_some() {
                Some(PushdownOperator::BeginsWithAny)
            } else {
                None
            }
        }
        ValueFilter::Id(f) => f.eq.as_ref().map(|_| PushdownOperator::Equals),
        ValueFilter::Enum(f) => f.eq.as_ref().map(|_| PushdownOperator::Equals),
        ValueFilter::Int(f) => f.eq.map(|_| PushdownOperator::Equals),
        ValueFilter::Bool(f) => f.eq.map(|_| PushdownOperator::Equals),
        ValueFilter::DateTime(f) => f.eq.map(|_| PushdownOperator::Equals),
        ValueFilter::Float(_) => None,
    }
}

fn native_kind(filter: &ValueFilter) -> NativeKind {
    match filter {
        ValueFilter::String(_) | ValueFilter::Id(_) | ValueFilter::Enum(_) | ValueFilter::Float(_) => {
            NativeKind::Text
        }
        ValueFilter::Int(_) => NativeKind::Int,
        ValueFilter::Bool(_) => NativeKind::Bool,
        ValueFilter::DateTime(_) => NativeKind::DateTime,
    }
}

/// Native operand(s) of the operator [`native_operator`] selects.
///
/// Equality and prefix give one value, `begins_with_any` one per prefix, a
/// filter without a native operator none. Floats have no native form at all.
pub fn get_property_values(filter: &ValueFilter) -> Result<Vec<String>> {
    let values = match filter {
        ValueFilter::String(f) => {
            if let Some(eq) = &f.eq {
                vec![eq.clone()]
            } else if let Some(prefix) = &f.begins_with {
                vec![prefix.clone()]
            } else if let Some(prefixes) = &f.begins_with_any {
                prefixes.clone()
            } else {
                Vec::new()
            }
        }
        ValueFilter::Id(f) => f.eq.iter().cloned().collect(),
        ValueFilter::Enum(f) => f.eq.iter().cloned().collect(),
        ValueFilter::Int(f) => f.eq.map(encode_int).into_iter().collect(),
        ValueFilter::Bool(f) => f.eq.map(|b| b.to_string()).into_iter().collect(),
        ValueFilter::DateTime(f) => f.eq.as_ref().map(encode_datetime).into_iter().collect(),
        ValueFilter::Float(_) => {
            return Err(GraphError::not_supported(
                "float filters have no native representation",
            ))
        }
    };
    Ok(values)
}

/// Order-preserving string form of an integer.
pub fn encode_int(value: i64) -> String {
    format!("{:020}", value as i128 - i64::MIN as i128)
}

pub fn encode_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Native form of a stored value read as `kind`; `None` when the value is not of that kind.
pub fn native_value_as(value: &Value, kind: NativeKind) -> Option<String> {
    match kind {
        NativeKind::Text => value.as_str().map(str::to_string),
        NativeKind::Int => value.as_i64().map(encode_int),
        NativeKind::Bool => value.as_bool().map(|b| b.to_string()),
        NativeKind::DateTime => parse_datetime(value).map(|dt| encode_datetime(&dt)),
    }
}

/// Sort form of a stored property value; `None` for values without one.
///
/// Ordering carries no declared type, so date-time strings are normalised to
/// keep mixed offsets in chronological order.
pub fn native_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(
            parse_datetime(value)
                .map(|dt| encode_datetime(&dt))
                .unwrap_or_else(|| s.clone()),
        ),
        Value::Number(n) => n.as_i64().map(encode_int),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
