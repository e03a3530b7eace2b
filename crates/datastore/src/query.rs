//! Declarative query builder: kind, filters, order, projection,
//! limit/offset, cursors, keys-only, namespace. Every modifier returns a new
//! `Query`; a built query is plain data and safe to share across concurrent
//! readers.

use crate::error::Error;
use crate::key::Key;
use crate::value::{IntoValue, Value};
use crate::wire;

/// The special property name that enables key-range filters against key
/// literals.
pub const KEY_PROPERTY: &str = "__key__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    NotEqual,
    In,
    NotIn,
}

impl FilterOp {
    fn wire_name(self) -> &'static str {
        match self {
            FilterOp::Equal => "EQUAL",
            FilterOp::LessThan => "LESS_THAN",
            FilterOp::LessOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOp::GreaterThan => "GREATER_THAN",
            FilterOp::GreaterOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOp::NotEqual => "NOT_EQUAL",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT_IN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn wire_name(self) -> &'static str {
        match self {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        }
    }
}

#[derive(Debug, Clone)]
struct Filter {
    property: String,
    op: FilterOp,
    value: Value,
}

#[derive(Debug, Clone)]
struct Order {
    property: String,
    direction: Direction,
}

/// An immutable query builder. Each modifier consumes `self` and
/// returns a new value, so a caller can fork a base query into several
/// variants without aliasing state.
#[derive(Debug, Clone)]
pub struct Query {
    kind: String,
    namespace: Option<String>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    projection: Vec<String>,
    distinct_on: Vec<String>,
    keys_only: bool,
    limit: Option<i32>,
    offset: Option<i32>,
    start_cursor: Option<String>,
    end_cursor: Option<String>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Query {
            kind: kind.into(),
            namespace: None,
            filters: Vec::new(),
            orders: Vec::new(),
            projection: Vec::new(),
            distinct_on: Vec::new(),
            keys_only: false,
            limit: None,
            offset: None,
            start_cursor: None,
            end_cursor: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds an equality/inequality/membership filter on `property`. Pass
    /// [`KEY_PROPERTY`] to filter on the entity's key.
    pub fn filter(
        mut self,
        property: impl Into<String>,
        op: FilterOp,
        value: impl IntoValue,
    ) -> Result<Self, Error> {
        self.filters.push(Filter {
            property: property.into(),
            op,
            value: value.into_value()?,
        });
        Ok(self)
    }

    /// Convenience for a `__key__` range filter against a key literal.
    pub fn filter_key(mut self, op: FilterOp, key: &Key) -> Self {
        self.filters.push(Filter {
            property: KEY_PROPERTY.to_string(),
            op,
            value: Value::Key(key.clone()),
        });
        self
    }

    pub fn order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            property: property.into(),
            direction,
        });
        self
    }

    pub fn project(mut self, properties: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.projection = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct_on(mut self, properties: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.distinct_on = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn limit(mut self, n: i32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i32) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn end_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.end_cursor = Some(cursor.into());
        self
    }

    pub fn namespace_ref(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub(crate) fn to_wire(&self) -> Result<wire::Query, Error> {
        let mut projection: Vec<wire::Projection> = self
            .projection
            .iter()
            .map(|p| wire::Projection {
                property: wire::PropertyReference { name: p.clone() },
            })
            .collect();
        if self.keys_only && projection.is_empty() {
            projection.push(wire::Projection {
                property: wire::PropertyReference {
                    name: KEY_PROPERTY.to_string(),
                },
            });
        }

        let property_filters = self
            .filters
            .iter()
            .map(|f| {
                Ok(wire::Filter {
                    property_filter: Some(wire::PropertyFilter {
                        property: wire::PropertyReference {
                            name: f.property.clone(),
                        },
                        op: f.op.wire_name().to_string(),
                        value: wire::value_to_json(&f.value, true)?,
                    }),
                    composite_filter: None,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let filter = match property_filters.len() {
            0 => None,
            1 => property_filters.into_iter().next(),
            _ => Some(wire::Filter {
                composite_filter: Some(Box::new(wire::CompositeFilter {
                    op: "AND".to_string(),
                    filters: property_filters,
                })),
                property_filter: None,
            }),
        };

        Ok(wire::Query {
            kind: vec![wire::KindExpression {
                name: self.kind.clone(),
            }],
            filter,
            order: self
                .orders
                .iter()
                .map(|o| wire::PropertyOrder {
                    property: wire::PropertyReference {
                        name: o.property.clone(),
                    },
                    direction: o.direction.wire_name().to_string(),
                })
                .collect(),
            projection,
            distinct_on: self
                .distinct_on
                .iter()
                .map(|p| wire::PropertyReference { name: p.clone() })
                .collect(),
            start_cursor: self.start_cursor.clone(),
            end_cursor: self.end_cursor.clone(),
            offset: self.offset,
            limit: self.limit,
        })
    }
}
