mod result_set;
mod row;

pub use result_set::{QueryResult, ResultSet};
pub use row::Row;
