//! Decoding rows into caller types for [`get`](crate::Database::get) and
//! [`select`](crate::Database::select).

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::error::SqlStmtError;
use crate::results::CustomDbRow;
use crate::types::RowValues;

/// Conversion from a single column value.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns [`SqlStmtError::Decode`] when the value has an incompatible type.
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError>;
}

/// Conversion from a whole row.
///
/// Scalars decode from single-column rows, tuples decode columns positionally.
/// Implement it for your own structs, usually via [`deserialize_row`]:
///
/// ```rust
/// use serde::Deserialize;
/// use sql_stmt_cache::{CustomDbRow, FromRow, SqlStmtError, deserialize_row};
///
/// #[derive(Deserialize)]
/// struct User {
///     id: String,
///     email: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
///         deserialize_row(row)
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// # Errors
    /// Returns [`SqlStmtError::Decode`] when the row shape or a column type does not
    /// match `Self`.
    fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError>;
}

fn mismatch(expected: &str, value: &RowValues) -> SqlStmtError {
    SqlStmtError::Decode(format!("expected {expected}, found {value:?}"))
}

impl FromValue for RowValues {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value.as_int().copied().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|e| SqlStmtError::Decode(format!("{wide} out of range: {e}")))
    }
}

impl FromValue for u64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|e| SqlStmtError::Decode(format!("{wide} out of range: {e}")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value.as_float().ok_or_else(|| mismatch("float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value.as_bool().copied().ok_or_else(|| mismatch("boolean", value))
    }
}

impl FromValue for String {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value
            .as_text()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("text", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value
            .as_blob()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("blob", value))
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        value.as_timestamp().ok_or_else(|| mismatch("timestamp", value))
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        match value {
            RowValues::Text(s) => serde_json::from_str(s)
                .map_err(|e| SqlStmtError::Decode(format!("invalid JSON text: {e}"))),
            other => Ok(other.to_json()),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &RowValues) -> Result<Self, SqlStmtError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

fn single_column(row: &CustomDbRow) -> Result<&RowValues, SqlStmtError> {
    match row.rows.as_slice() {
        [value] => Ok(value),
        values => Err(SqlStmtError::Decode(format!(
            "expected a single column, found {}",
            values.len()
        ))),
    }
}

macro_rules! impl_from_row_scalar {
    ($($t:ty),*) => {
        $(
            impl FromRow for $t {
                fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
                    <$t as FromValue>::from_value(single_column(row)?)
                }
            }

            impl FromRow for Option<$t> {
                fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
                    <Option<$t> as FromValue>::from_value(single_column(row)?)
                }
            }
        )*
    };
}

impl_from_row_scalar!(RowValues, i64, i32, u64, f64, bool, String, Vec<u8>, NaiveDateTime);

macro_rules! impl_from_row_tuple {
    ($len:expr => $($name:ident : $idx:tt),+) => {
        impl<$($name: FromValue),+> FromRow for ($($name,)+) {
            fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
                if row.len() != $len {
                    return Err(SqlStmtError::Decode(format!(
                        "expected {} columns, found {}",
                        $len,
                        row.len()
                    )));
                }
                Ok(($($name::from_value(&row.rows[$idx])?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => A: 0);
impl_from_row_tuple!(2 => A: 0, B: 1);
impl_from_row_tuple!(3 => A: 0, B: 1, C: 2);
impl_from_row_tuple!(4 => A: 0, B: 1, C: 2, D: 3);

impl FromRow for CustomDbRow {
    fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
        Ok(row.clone())
    }
}

/// Decodes the row as a JSON object keyed by column name.
impl FromRow for JsonValue {
    fn from_row(row: &CustomDbRow) -> Result<Self, SqlStmtError> {
        Ok(JsonValue::Object(row_to_object(row)))
    }
}

fn row_to_object(row: &CustomDbRow) -> Map<String, JsonValue> {
    row.column_names
        .iter()
        .zip(row.rows.iter())
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

/// Decode a row into any `serde` type whose field names match the column names.
///
/// # Errors
/// Returns [`SqlStmtError::Decode`] when a column is missing or has the wrong type.
pub fn deserialize_row<T: DeserializeOwned>(row: &CustomDbRow) -> Result<T, SqlStmtError> {
    serde_json::from_value(JsonValue::Object(row_to_object(row)))
        .map_err(|e| SqlStmtError::Decode(e.to_string()))
}
