use rusqlite::types::Value as SqliteValue;
use rusqlite::{Connection, Statement};

use crate::error::DispatchError;
use crate::results::ResultSet;
use crate::types::{Params, Value};

use super::params::{sqlite_value_to_value, value_to_sqlite_value};

/// Bind every placeholder of `stmt` from `params`.
///
/// # Errors
/// Returns `DispatchError::ParameterError` when a placeholder has no binding, or the mapped
/// rusqlite error when binding fails.
pub fn bind_params(
    stmt: &mut Statement<'_>,
    params: &Params,
    map_err: &impl Fn(rusqlite::Error) -> DispatchError,
) -> Result<(), DispatchError> {
    for index in 1..=stmt.parameter_count() {
        let value = value_to_sqlite_value(params.lookup(stmt.parameter_name(index), index)?);
        stmt.raw_bind_parameter(index, value).map_err(map_err)?;
    }
    Ok(())
}

/// Bind, step and materialize one statement.
///
/// Statements without result columns report the rows they changed as `rows_affected`,
/// measured on the connection's running total so DDL reports zero.
///
/// # Errors
/// Returns the mapped rusqlite error if binding or stepping fails.
pub fn run_statement(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    params: &Params,
    map_err: &impl Fn(rusqlite::Error) -> DispatchError,
) -> Result<ResultSet, DispatchError> {
    bind_params(stmt, params, map_err)?;
    let changes_before = conn.total_changes();

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();
    let mut result_set = ResultSet::with_columns(column_names);

    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next().map_err(map_err)? {
        let mut values: Vec<Value> = Vec::with_capacity(col_count);
        for i in 0..col_count {
            let value: SqliteValue = row.get(i).map_err(map_err)?;
            values.push(sqlite_value_to_value(value));
        }
        result_set.add_row_values(values);
    }
    drop(rows);

    if col_count == 0 {
        let changed = conn.total_changes().saturating_sub(changes_before);
        result_set.rows_affected = usize::try_from(changed).unwrap_or(usize::MAX);
    }
    Ok(result_set)
}
