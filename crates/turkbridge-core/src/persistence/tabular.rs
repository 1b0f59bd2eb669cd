use std::collections::BTreeMap;

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::PersistenceResult;

#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Column-oriented read result: every column holds one cell per row, cells
/// are text (`None` for SQL NULL).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnarResult {
    column_names: Vec<String>,
    columns: BTreeMap<String, Vec<Option<String>>>,
    row_count: usize,
}

impl ColumnarResult {
    pub fn with_columns(
        column_names: impl IntoIterator<Item = impl Into<String>>,
    ) -> PersistenceResult<Self> {
        let mut result = Self::default();
        for name in column_names {
            let name = name.into();
            if result.columns.insert(name.clone(), Vec::new()).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::Query,
                    format!("result set has duplicate column '{name}'"),
                ));
            }
            result.column_names.push(name);
        }
        Ok(result)
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> PersistenceResult<()> {
        if row.len() != self.column_names.len() {
            return Err(CoreError::new(
                CoreErrorKind::Query,
                format!(
                    "row has {} cells but result set has {} columns",
                    row.len(),
                    self.column_names.len()
                ),
            ));
        }
        for (name, cell) in self.column_names.iter().zip(row) {
            if let Some(column) = self.columns.get_mut(name) {
                column.push(cell);
            }
        }
        self.row_count += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Like [`column`](Self::column), but an absent column is a query error
    /// rather than an empty result.
    pub fn require_column(&self, name: &str) -> PersistenceResult<&[Option<String>]> {
        self.column(name).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::Query,
                format!("result set is missing column '{name}'"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnarResult, SqlStatement, SqlValue};
    use crate::models::CoreErrorKind;

    #[test]
    fn empty_result_keeps_columns_addressable() {
        let result = ColumnarResult::with_columns(["task_id", "payload"]).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.column("task_id"), Some(&[][..]));
        assert_eq!(
            result.require_column("status").unwrap_err().kind,
            CoreErrorKind::Query
        );
    }

    #[test]
    fn rows_are_split_into_columns_in_order() {
        let mut result = ColumnarResult::with_columns(["a", "b"]).unwrap();
        result.push_row(vec![Some("1".to_string()), None]).unwrap();
        result
            .push_row(vec![Some("2".to_string()), Some("x".to_string())])
            .unwrap();

        assert_eq!(result.row_count(), 2);
        assert_eq!(
            result.column("a").unwrap(),
            &[Some("1".to_string()), Some("2".to_string())]
        );
        assert_eq!(result.column("b").unwrap(), &[None, Some("x".to_string())]);
    }

    #[test]
    fn mismatched_row_width_is_rejected() {
        let mut result = ColumnarResult::with_columns(["a"]).unwrap();
        assert!(result.push_row(vec![None, None]).is_err());
        assert_eq!(result.row_count(), 0);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        assert!(ColumnarResult::with_columns(["a", "a"]).is_err());
    }

    #[test]
    fn optional_binds_become_null() {
        let statement = SqlStatement::new("SELECT ?1, ?2")
            .bind(None::<&str>)
            .bind(Some(3_i64));
        assert_eq!(statement.params, vec![SqlValue::Null, SqlValue::Integer(3)]);
    }
}
