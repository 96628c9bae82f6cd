//! Column descriptors, rows and result sets.

use std::sync::Arc;

use mssql_types::{FromSql, SqlValue, TypeError, TypeInfo};
use tds_protocol::ColumnFlags;

/// Name of the trailing status column added to cursor fetch results.
pub const ROWSTAT_COLUMN: &str = "ROWSTAT";

/// Column metadata from a COLMETADATA token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Wire type information.
    pub type_info: TypeInfo,
}

impl Column {
    /// Check whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    /// SQL type name such as `nvarchar(50)`.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.type_info.sql_type_name()
    }
}

/// Row descriptor of one result set.
///
/// `wire` is every column the server sends per row. `visible` is what the
/// caller sees: the same list without a trailing ROWSTAT column when rows
/// come from a server cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescriptor {
    wire: Arc<[Column]>,
    visible: Arc<[Column]>,
}

impl RowDescriptor {
    /// Build a descriptor, hiding a trailing ROWSTAT column if `strip_rowstat`.
    #[must_use]
    pub fn new(columns: Vec<Column>, strip_rowstat: bool) -> Self {
        let wire: Arc<[Column]> = columns.into();
        let hide = strip_rowstat
            && wire
                .last()
                .is_some_and(|c| c.name.eq_ignore_ascii_case(ROWSTAT_COLUMN));
        let visible = if hide {
            wire[..wire.len() - 1].into()
        } else {
            Arc::clone(&wire)
        };
        Self { wire, visible }
    }

    /// Columns present on the wire.
    #[must_use]
    pub fn wire_columns(&self) -> &[Column] {
        &self.wire
    }

    /// Columns surfaced to the caller.
    #[must_use]
    pub fn columns(&self) -> &Arc<[Column]> {
        &self.visible
    }
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row. `values` must line up with `columns`.
    #[must_use]
    pub fn new(columns: Arc<[Column]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value by index.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row into its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Converted value by index.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        let value = self.values.get(index).ok_or_else(|| TypeError::TypeMismatch {
            expected: "column index in range",
            actual: format!("index {index} of {}", self.values.len()),
        })?;
        T::from_sql(value)
    }

    /// Converted value by index, `None` for NULL.
    pub fn try_get<T: FromSql>(&self, index: usize) -> Result<Option<T>, TypeError> {
        match self.values.get(index) {
            Some(value) => T::from_sql_nullable(value),
            None => Ok(None),
        }
    }

    /// Converted value by case-insensitive column name.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "existing column",
                actual: name.to_string(),
            })?;
        self.get(index)
    }
}

/// Rows and row count of one result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Columns surfaced to the caller.
    pub columns: Option<Arc<[Column]>>,
    /// Rows in arrival order.
    pub rows: Vec<Row>,
    /// Affected row count from the closing DONE, if the server sent one.
    pub rows_affected: Option<u64>,
}

impl ResultSet {
    /// Whether the set has neither columns nor rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_none() && self.rows.is_empty()
    }
}

/// A non-error message sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    /// Message number.
    pub number: i32,
    /// Severity class.
    pub class: u8,
    /// Text.
    pub message: String,
}

/// Everything a query-like command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result sets in order. The first set is the primary result; the rest
    /// follow it as the next-result chain.
    pub result_sets: Vec<ResultSet>,
    /// INFO messages.
    pub messages: Vec<InfoMessage>,
    /// Last RETURNSTATUS value.
    pub return_status: Option<i32>,
}

impl QueryResult {
    /// Rows of the first result set.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        self.result_sets.first().map_or(&[], |s| s.rows.as_slice())
    }

    /// Sum of the affected row counts of all result sets.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.result_sets.iter().filter_map(|s| s.rows_affected).sum()
    }

    /// Consume into the rows of every result set, in order.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.result_sets.into_iter().flat_map(|s| s.rows).collect()
    }
}
