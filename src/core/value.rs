use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::fmt;
use crate::core::{DbError, Result};

/// Host-side value, as application code sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Int32(_) => "INT32",
            Self::Int64(_) => "INT64",
            Self::Decimal(_) => "DECIMAL",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int32(i) => write!(f, "{}", i),
            Self::Int64(i) => write!(f, "{}", i),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// Wire-level value handed to a session as a statement parameter or bulk
/// row cell.
///
/// Decimals travel as an unscaled 128-bit integer plus scale, timestamps as
/// microseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WireValue {
    Null,
    Int32(i32),
    Int64(i64),
    Decimal { unscaled: i128, scale: u8 },
    Utf8(String),
    Bool(bool),
    Timestamp(i64),
}

impl WireValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Decimal { .. } => "Decimal",
            Self::Utf8(_) => "Utf8",
            Self::Bool(_) => "Bool",
            Self::Timestamp(_) => "Timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view used by scalar results such as `COUNT(*)`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(i64::from(*i)),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int32(i) => write!(f, "{}i32", i),
            Self::Int64(i) => write!(f, "{}i64", i),
            Self::Decimal { unscaled, scale } => write!(f, "{}e-{}", unscaled, scale),
            Self::Utf8(s) => write!(f, "{:?}", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Timestamp(us) => write!(f, "{}us", us),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a decoded host value back into a field type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> DbError {
    DbError::TypeMismatch(format!("expected {}, got {}", expected, value.type_name()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int32(i) => Ok(i),
            Value::Int64(i) => i32::try_from(i).map_err(|_| DbError::TypeOverflow {
                column: String::new(),
                message: format!("{} does not fit in INT32", i),
            }),
            other => Err(mismatch("INT32", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int32(i) => Ok(i64::from(i)),
            Value::Int64(i) => Ok(i),
            other => Err(mismatch("INT64", &other)),
        }
    }
}

impl FromValue for BigDecimal {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(d) => Ok(d),
            Value::Int32(i) => Ok(BigDecimal::from(i)),
            Value::Int64(i) => Ok(BigDecimal::from(i)),
            other => Err(mismatch("DECIMAL", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("TEXT", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch("BOOLEAN", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            other => Err(mismatch("TIMESTAMP", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_option_conversions() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Int64(7)).unwrap(), Some(7));
    }

    #[test]
    fn test_decimal_equality_ignores_trailing_zeros() {
        let a = Value::Decimal(BigDecimal::from_str("1.50").unwrap());
        let b = Value::Decimal(BigDecimal::from_str("1.5").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_value_mismatch() {
        let err = bool::from_value(Value::Text("yes".into())).unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch(_)));
    }

    #[test]
    fn test_wire_value_ordering_is_total() {
        let mut values = vec![WireValue::Int64(3), WireValue::Int64(1), WireValue::Int64(2)];
        values.sort();
        assert_eq!(values, vec![WireValue::Int64(1), WireValue::Int64(2), WireValue::Int64(3)]);
    }
}
