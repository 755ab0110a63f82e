use crate::core::{ColumnDescriptor, DbError, FromValue, Result, Row, TableSchema, Value};

/// A host record type mapped to a table.
///
/// The column list is declared statically and validated once, when the
/// schema is first registered. [`declare_entity!`](crate::declare_entity)
/// generates the implementation for plain structs.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Default physical table name.
    fn table_name() -> &'static str;

    /// Column descriptors in row order.
    fn columns() -> Vec<ColumnDescriptor>;

    /// Host values in the order of [`Entity::columns`].
    fn to_row(&self) -> Row;

    /// Rebuilds an instance from a decoded row.
    fn from_row(row: Row) -> Result<Self>;

    fn schema() -> Result<TableSchema> {
        TableSchema::new(Self::table_name(), Self::columns())
    }
}

/// Pops the next value of a decoded row and converts it to a field type.
pub fn take_field<T, I>(values: &mut I, field: &str) -> Result<T>
where
    T: FromValue,
    I: Iterator<Item = Value>,
{
    let value = values
        .next()
        .ok_or_else(|| DbError::TypeMismatch(format!("row is missing field '{}'", field)))?;

    T::from_value(value).map_err(|err| match err {
        DbError::TypeMismatch(message) => DbError::TypeMismatch(format!("field '{}': {}", field, message)),
        DbError::TypeOverflow { message, .. } => DbError::TypeOverflow {
            column: field.to_string(),
            message,
        },
        other => other,
    })
}

/// Implements [`Entity`] for a struct from an explicit column list.
///
/// Each entry names a struct field and the descriptor of the column it maps
/// to. The field name becomes the column's logical name; the descriptor
/// carries the physical name, type, nullability and key membership.
///
/// ```ignore
/// struct Order {
///     id: i64,
///     amount: BigDecimal,
///     note: Option<String>,
/// }
///
/// declare_entity!(Order => "orders" {
///     id: ColumnDescriptor::new("order_id", SqlType::Int64).primary_key(),
///     amount: ColumnDescriptor::new("amount", SqlType::decimal(18, 2)),
///     note: ColumnDescriptor::new("note", SqlType::Text).nullable(),
/// });
/// ```
#[macro_export]
macro_rules! declare_entity {
    ($ty:ident => $table:literal { $($field:ident : $desc:expr),+ $(,)? }) => {
        impl $crate::Entity for $ty {
            fn table_name() -> &'static str {
                $table
            }

            fn columns() -> ::std::vec::Vec<$crate::ColumnDescriptor> {
                ::std::vec![
                    $( $crate::ColumnDescriptor::field($desc, stringify!($field)) ),+
                ]
            }

            fn to_row(&self) -> $crate::Row {
                ::std::vec![
                    $( $crate::Value::from(::std::clone::Clone::clone(&self.$field)) ),+
                ]
            }

            fn from_row(row: $crate::Row) -> $crate::Result<Self> {
                let mut values = row.into_iter();
                ::std::result::Result::Ok(Self {
                    $( $field: $crate::mapping::take_field(&mut values, stringify!($field))?, )+
                })
            }
        }
    };
}
