//! Result rows and result sets.

use std::sync::Arc;

use crate::error::{SprocError, SprocResult};
use crate::value::{FromSqlValue, SqlValue};

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.index_of(column).map(|i| &self.values[i])
    }

    /// Get a column value by name.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> SprocResult<T> {
        let value = self
            .value(column)
            .ok_or_else(|| SprocError::type_conversion(format!("no column named '{}'", column)))?;
        T::from_sql_value(value).map_err(|e| {
            SprocError::type_conversion(format!("failed to get column '{}': {}", column, e))
        })
    }

    /// Get a column value by position.
    pub fn get_index<T: FromSqlValue>(&self, index: usize) -> SprocResult<T> {
        let value = self.values.get(index).ok_or_else(|| {
            SprocError::type_conversion(format!("column index {} out of range", index))
        })?;
        T::from_sql_value(value)
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// One result set produced by a procedure or statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Create an empty result set with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: columns.into(),
            rows: Vec::new(),
        }
    }

    /// Append a row of values in column order.
    pub fn push(&mut self, values: Vec<SqlValue>) -> SprocResult<()> {
        if values.len() != self.columns.len() {
            return Err(SprocError::type_conversion(format!(
                "row has {} values but the result set has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(Row::new(Arc::clone(&self.columns), values));
        Ok(())
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map every row through [`FromRow`].
    pub fn map<T: FromRow>(&self) -> SprocResult<Vec<T>> {
        self.rows.iter().map(T::from_row).collect()
    }

    /// Consume the result set, returning its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Trait for projecting a row into a caller-defined type.
pub trait FromRow: Sized {
    /// Build a value from a row.
    fn from_row(row: &Row) -> SprocResult<Self>;
}

/// Macro to implement [`FromRow`] for simple structs whose fields match column names.
///
/// Usage:
/// ```rust
/// use sproc_core::impl_from_row;
///
/// struct User {
///     id: i32,
///     name: String,
/// }
///
/// impl_from_row!(User { id: i32, name: String });
/// ```
#[macro_export]
macro_rules! impl_from_row {
    ($type:ident { $($field:ident : $field_type:ty),* $(,)? }) => {
        impl $crate::row::FromRow for $type {
            fn from_row(row: &$crate::row::Row) -> $crate::error::SprocResult<Self> {
                Ok(Self {
                    $(
                        $field: row.get::<$field_type>(stringify!($field))?,
                    )*
                })
            }
        }
    };
}
