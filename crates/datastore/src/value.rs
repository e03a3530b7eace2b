//! The closed, tagged property-value union and the traits the entity
//! codec (manual or derived) implements against it.

use chrono::{DateTime, Utc};

use crate::entity::Entity;
use crate::error::{Error, ValueError};
use crate::key::Key;

/// A single property value. Arrays of arrays are rejected at the point
/// they're translated onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Blob(Vec<u8>),
    Key(Key),
    Entity(Entity),
    Array(Vec<Value>),
}

/// Translates a Rust value into its typed property.
///
/// Fallible because integer widening can overflow (`u64` values `>= 2^63`
/// fail) and because nested structs recurse through [`crate::entity::IntoEntity`].
pub trait IntoValue {
    fn into_value(&self) -> Result<Value, Error>;
}

/// Translates a stored property back into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

/// Determines whether a value is its type's zero value, for `omitempty`
/// (applies only on encode; decode never drops a property to its zero value).
pub trait IsZero {
    fn is_zero(&self) -> bool;
}

macro_rules! impl_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoValue for $t {
                fn into_value(&self) -> Result<Value, Error> {
                    Ok(Value::Integer(*self as i64))
                }
            }
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self, ValueError> {
                    match value {
                        Value::Integer(i) => <$t>::try_from(*i)
                            .map_err(|_| ValueError::new(format!("integer {i} out of range for target type"))),
                        other => Err(ValueError::new(format!("expected integer value, found {other:?}"))),
                    }
                }
            }
            impl IsZero for $t {
                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, isize, u8, u16, u32);

// i64 is the wire integer type; reuse its conversion rather than the
// try_from path the macro generates for narrower types.
impl IntoValue for i64 {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Integer(*self))
    }
}
impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(i) => Ok(*i),
            other => Err(ValueError::new(format!(
                "expected integer value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for i64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}

// Unsigned 64-bit widening rejects values that don't fit in a signed 64-bit
// wire integer.
impl IntoValue for u64 {
    fn into_value(&self) -> Result<Value, Error> {
        i64::try_from(*self)
            .map(Value::Integer)
            .map_err(|_| Error::invalid_entity_type(format!("u64 value {self} exceeds i64::MAX")))
    }
}
impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Integer(i) => u64::try_from(*i)
                .map_err(|_| ValueError::new(format!("integer {i} is negative"))),
            other => Err(ValueError::new(format!(
                "expected integer value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for u64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}
impl IntoValue for usize {
    fn into_value(&self) -> Result<Value, Error> {
        (*self as u64).into_value()
    }
}
impl FromValue for usize {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        u64::from_value(value).map(|v| v as usize)
    }
}
impl IsZero for usize {
    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl IntoValue for bool {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Boolean(*self))
    }
}
impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(ValueError::new(format!(
                "expected boolean value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl IntoValue for f64 {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Double(*self))
    }
}
impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Double(d) => Ok(*d),
            Value::Integer(i) => Ok(*i as f64),
            other => Err(ValueError::new(format!(
                "expected double value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for f64 {
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl IntoValue for String {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::String(self.clone()))
    }
}
impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(ValueError::new(format!(
                "expected string value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Timestamp(*self))
    }
}
impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            other => Err(ValueError::new(format!(
                "expected timestamp value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for DateTime<Utc> {
    fn is_zero(&self) -> bool {
        self.timestamp() == 0 && self.timestamp_subsec_nanos() == 0
    }
}

/// An opaque byte string (base64 on the wire).
///
/// A bare `Vec<u8>` instead round-trips as an `arrayValue` of integers
/// through the blanket `Vec<T>` impl below, matching the common Rust
/// convention (mirrored by `serde` vs. `serde_bytes`) that byte-oriented
/// wire representations need an explicit opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}
impl From<Bytes> for Vec<u8> {
    fn from(b: Bytes) -> Self {
        b.0
    }
}

impl IntoValue for Bytes {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Blob(self.0.clone()))
    }
}
impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Blob(b) => Ok(Bytes(b.clone())),
            other => Err(ValueError::new(format!(
                "expected blob value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for Bytes {
    fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoValue for Key {
    fn into_value(&self) -> Result<Value, Error> {
        Ok(Value::Key(self.clone()))
    }
}
impl FromValue for Key {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Key(k) => Ok(k.clone()),
            other => Err(ValueError::new(format!(
                "expected key value, found {other:?}"
            ))),
        }
    }
}
impl IsZero for Key {
    fn is_zero(&self) -> bool {
        false
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(&self) -> Result<Value, Error> {
        match self {
            Some(inner) => inner.into_value(),
            None => Ok(Value::Null),
        }
    }
}
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
impl<T> IsZero for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(&self) -> Result<Value, Error> {
        let values = self
            .iter()
            .map(IntoValue::into_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(values))
    }
}
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Array(values) => values.iter().map(T::from_value).collect(),
            other => Err(ValueError::new(format!(
                "expected array value, found {other:?}"
            ))),
        }
    }
}
impl<T> IsZero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}
