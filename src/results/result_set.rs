use std::collections::HashMap;
use std::sync::Arc;

use super::row::{Row, index_columns};
use crate::types::Value;

/// The rows produced by one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub results: Vec<Row>,
    /// Rows returned for queries, rows changed for DML
    pub rows_affected: usize,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set with the given columns
    #[must_use]
    pub fn with_columns(column_names: Vec<String>) -> ResultSet {
        let column_index = Arc::new(index_columns(&column_names));
        ResultSet {
            results: Vec::new(),
            rows_affected: 0,
            column_names: Arc::new(column_names),
            column_index,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Append a row; the column index is shared with every other row of this set.
    pub fn add_row_values(&mut self, values: Vec<Value>) {
        self.results.push(Row {
            column_names: Arc::clone(&self.column_names),
            values,
            column_index: Arc::clone(&self.column_index),
        });
        self.rows_affected += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Plain row values, dropping the column metadata.
    #[must_use]
    pub fn into_values(self) -> Vec<Vec<Value>> {
        self.results.into_iter().map(|row| row.values).collect()
    }

    /// Values of the first row, if any.
    #[must_use]
    pub fn first_row(&self) -> Option<&[Value]> {
        self.results.first().map(|row| row.values.as_slice())
    }
}

/// Outcome of one `execute` call.
///
/// Multi-statement query text yields one [`ResultSet`] per statement, in statement order.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Single(ResultSet),
    Multiple(Vec<ResultSet>),
}

impl QueryResult {
    pub(crate) fn from_sets(mut sets: Vec<ResultSet>) -> Self {
        if sets.len() == 1 {
            QueryResult::Single(sets.remove(0))
        } else {
            QueryResult::Multiple(sets)
        }
    }

    /// The single result set, or `None` for multi-statement results.
    #[must_use]
    pub fn single(self) -> Option<ResultSet> {
        match self {
            QueryResult::Single(set) => Some(set),
            QueryResult::Multiple(_) => None,
        }
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<ResultSet> {
        match self {
            QueryResult::Single(set) => vec![set],
            QueryResult::Multiple(sets) => sets,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Single(_) => 1,
            QueryResult::Multiple(sets) => sets.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_column_lookup() {
        let mut set = ResultSet::with_columns(vec!["a".into(), "b".into()]);
        set.add_row_values(vec![Value::Int(1), Value::Text("x".into())]);
        set.add_row_values(vec![Value::Int(2), Value::Null]);
        assert_eq!(set.rows_affected, 2);
        assert_eq!(set.results[1].get("a"), Some(&Value::Int(2)));
        assert!(set.results[1].get("b").is_some_and(Value::is_null));
        assert_eq!(set.results[0].get("missing"), None);
    }

    #[test]
    fn single_statement_is_not_wrapped() {
        let result = QueryResult::from_sets(vec![ResultSet::default()]);
        assert!(matches!(result, QueryResult::Single(_)));
        let result = QueryResult::from_sets(vec![ResultSet::default(), ResultSet::default()]);
        assert_eq!(result.len(), 2);
    }
}
