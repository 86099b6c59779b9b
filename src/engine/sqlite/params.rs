use rusqlite::types::Value as SqliteValue;

use crate::types::Value;

/// Convert a single dispatcher [`Value`] to a rusqlite value.
#[must_use]
pub fn value_to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Timestamp(dt) => SqliteValue::Text(dt.format("%F %T%.f").to_string()),
        Value::Null => SqliteValue::Null,
        // Only serialize once to avoid multiple allocations
        Value::JSON(jval) => SqliteValue::Text(jval.to_string()),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

/// Convert a rusqlite value read from a row.
#[must_use]
pub fn sqlite_value_to_value(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Int(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Blob(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools_and_timestamps_are_stored_as_sqlite_affinities() {
        assert_eq!(value_to_sqlite_value(&Value::Bool(true)), SqliteValue::Integer(1));
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        assert_eq!(
            value_to_sqlite_value(&Value::Timestamp(dt)),
            SqliteValue::Text("2024-01-02 03:04:05".into())
        );
    }
}
