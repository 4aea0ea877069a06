use rusqlite::types::Value;

use crate::error::SqlStmtError;
use crate::params::NamedParams;
use crate::types::RowValues;

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Placeholder names of a prepared statement, sigils stripped, in index order.
///
/// # Errors
/// Returns [`SqlStmtError::ParameterError`] for positional (`?`, `?NNN`) placeholders.
pub(crate) fn placeholder_names(stmt: &rusqlite::Statement<'_>) -> Result<Vec<String>, SqlStmtError> {
    (1..=stmt.parameter_count())
        .map(|idx| match stmt.parameter_name(idx) {
            Some(name) if !name.starts_with('?') => {
                Ok(crate::params::strip_sigil(name).to_owned())
            }
            _ => Err(SqlStmtError::ParameterError(format!(
                "placeholder {idx} is positional; use :name placeholders"
            ))),
        })
        .collect()
}

/// Bind every placeholder of `stmt` from `params` by name. Extra params are ignored.
///
/// # Errors
/// Returns [`SqlStmtError::MissingParameter`] for a placeholder without a value.
pub(crate) fn bind_named(
    stmt: &mut rusqlite::Statement<'_>,
    params: &NamedParams,
) -> Result<(), SqlStmtError> {
    for (idx, name) in placeholder_names(stmt)?.iter().enumerate() {
        let value = row_value_to_sqlite_value(params.require(name)?);
        stmt.raw_bind_parameter(idx + 1, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::named_params;

    #[test]
    fn converts_row_values() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::Timestamp(ts)),
            Value::Text("2024-05-01 12:30:00".into())
        );
        assert_eq!(
            row_value_to_sqlite_value(&RowValues::JSON(serde_json::json!({"a": 1}))),
            Value::Text(r#"{"a":1}"#.into())
        );
    }

    #[test]
    fn binds_by_name_regardless_of_sigil() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT :a + @b + $a").unwrap();
        bind_named(&mut stmt, &named_params! { "a" => 1, "b" => 10, "unused" => 0 }).unwrap();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.get::<_, i64>(0).unwrap(), 12);
    }

    #[test]
    fn missing_and_positional_placeholders_fail() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT :a").unwrap();
        let err = bind_named(&mut stmt, &NamedParams::new()).unwrap_err();
        assert!(matches!(err, SqlStmtError::MissingParameter(ref name) if name == "a"));

        let stmt = conn.prepare("SELECT ?").unwrap();
        assert!(matches!(
            placeholder_names(&stmt),
            Err(SqlStmtError::ParameterError(_))
        ));
    }
}
