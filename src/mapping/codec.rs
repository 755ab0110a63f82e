//! Bidirectional conversion between host values and wire values.
//!
//! Every function here is pure: the same value and column always produce the
//! same result, and nothing touches a session.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use crate::core::{ColumnDescriptor, DbError, Result, SqlType, TableSchema, Value, WireValue, MAX_DECIMAL_PRECISION};

/// Encodes one host value for `column`.
pub fn encode(value: &Value, column: &ColumnDescriptor) -> Result<WireValue> {
    if value.is_null() {
        if column.nullable {
            return Ok(WireValue::Null);
        }
        return Err(DbError::NullabilityViolation(column.column.clone()));
    }

    match (column.sql_type, value) {
        (SqlType::Int32, Value::Int32(i)) => Ok(WireValue::Int32(*i)),
        (SqlType::Int32, Value::Int64(i)) => i32::try_from(*i)
            .map(WireValue::Int32)
            .map_err(|_| overflow(column, format!("{} does not fit in INT32", i))),

        (SqlType::Int64, Value::Int32(i)) => Ok(WireValue::Int64(i64::from(*i))),
        (SqlType::Int64, Value::Int64(i)) => Ok(WireValue::Int64(*i)),

        (SqlType::Decimal { precision, scale }, Value::Decimal(d)) => {
            encode_decimal(d, column, precision, scale)
        }
        (SqlType::Decimal { precision, scale }, Value::Int32(i)) => {
            encode_decimal(&BigDecimal::from(*i), column, precision, scale)
        }
        (SqlType::Decimal { precision, scale }, Value::Int64(i)) => {
            encode_decimal(&BigDecimal::from(*i), column, precision, scale)
        }

        (SqlType::Text, Value::Text(s)) => Ok(WireValue::Utf8(s.clone())),
        (SqlType::Boolean, Value::Boolean(b)) => Ok(WireValue::Bool(*b)),
        (SqlType::Timestamp, Value::Timestamp(ts)) => Ok(WireValue::Timestamp(ts.timestamp_micros())),

        (sql_type, other) => Err(DbError::TypeMismatch(format!(
            "Column '{}' expects type {}, got {}",
            column.column,
            sql_type,
            other.type_name()
        ))),
    }
}

/// Decodes one wire value read from `column`.
pub fn decode(wire: &WireValue, column: &ColumnDescriptor) -> Result<Value> {
    if wire.is_null() {
        if column.nullable {
            return Ok(Value::Null);
        }
        return Err(DbError::NullabilityViolation(column.column.clone()));
    }

    match (column.sql_type, wire) {
        (SqlType::Int32, WireValue::Int32(i)) => Ok(Value::Int32(*i)),
        (SqlType::Int32, WireValue::Int64(i)) => i32::try_from(*i)
            .map(Value::Int32)
            .map_err(|_| overflow(column, format!("{} does not fit in INT32", i))),

        (SqlType::Int64, WireValue::Int32(i)) => Ok(Value::Int64(i64::from(*i))),
        (SqlType::Int64, WireValue::Int64(i)) => Ok(Value::Int64(*i)),

        (SqlType::Decimal { .. }, WireValue::Decimal { unscaled, scale }) => Ok(Value::Decimal(
            BigDecimal::new(BigInt::from(*unscaled), i64::from(*scale)),
        )),
        (SqlType::Decimal { .. }, WireValue::Int32(i)) => Ok(Value::Decimal(BigDecimal::from(*i))),
        (SqlType::Decimal { .. }, WireValue::Int64(i)) => Ok(Value::Decimal(BigDecimal::from(*i))),

        (SqlType::Text, WireValue::Utf8(s)) => Ok(Value::Text(s.clone())),
        (SqlType::Boolean, WireValue::Bool(b)) => Ok(Value::Boolean(*b)),
        (SqlType::Timestamp, WireValue::Timestamp(us)) => DateTime::<Utc>::from_timestamp_micros(*us)
            .map(Value::Timestamp)
            .ok_or_else(|| overflow(column, format!("{} microseconds is out of range", us))),

        (sql_type, other) => Err(DbError::TypeMismatch(format!(
            "Column '{}' of type {} cannot decode wire value {}",
            column.column,
            sql_type,
            other.type_name()
        ))),
    }
}

/// Encodes a full row in schema order.
pub fn encode_row(schema: &TableSchema, row: &[Value]) -> Result<Vec<WireValue>> {
    check_arity(schema, row.len())?;
    schema
        .columns()
        .iter()
        .zip(row)
        .map(|(column, value)| encode(value, column))
        .collect()
}

/// Decodes a full row in schema order.
pub fn decode_row(schema: &TableSchema, wire: &[WireValue]) -> Result<Vec<Value>> {
    check_arity(schema, wire.len())?;
    schema
        .columns()
        .iter()
        .zip(wire)
        .map(|(column, value)| decode(value, column))
        .collect()
}

fn check_arity(schema: &TableSchema, len: usize) -> Result<()> {
    if len != schema.column_count() {
        return Err(DbError::TypeMismatch(format!(
            "row has {} value(s), table '{}' has {} column(s)",
            len,
            schema.table(),
            schema.column_count()
        )));
    }
    Ok(())
}

fn overflow(column: &ColumnDescriptor, message: String) -> DbError {
    DbError::TypeOverflow {
        column: column.column.clone(),
        message,
    }
}

/// Rescales `value` to exactly `scale` fractional digits. Digits beyond the
/// scale are rejected, never rounded away.
fn encode_decimal(value: &BigDecimal, column: &ColumnDescriptor, precision: u8, scale: u8) -> Result<WireValue> {
    let (mantissa, exponent) = value.normalized().as_bigint_and_exponent();
    let target = i64::from(scale);

    if exponent > target {
        return Err(overflow(
            column,
            format!("{} has more than {} fractional digit(s)", value, scale),
        ));
    }

    // A shift this large can only come from an integer part far beyond any
    // supported precision.
    let shift = target - exponent;
    if shift > i64::from(MAX_DECIMAL_PRECISION) * 2 {
        return Err(overflow(
            column,
            format!("{} exceeds DECIMAL({},{})", value, precision, scale),
        ));
    }

    let unscaled = mantissa * BigInt::from(10u8).pow(shift as u32);
    let digits = unscaled.magnitude().to_string().len();
    if digits > usize::from(precision) {
        return Err(overflow(
            column,
            format!("{} exceeds DECIMAL({},{})", value, precision, scale),
        ));
    }

    let unscaled = unscaled
        .to_i128()
        .ok_or_else(|| overflow(column, format!("{} does not fit in 128 bits", value)))?;

    Ok(WireValue::Decimal { unscaled, scale })
}
