use std::fmt::Debug;

use linkq_error::{DbError, Result};

use super::Value;
use crate::types::DataType;

/// A real data collection that a query can run against.
pub trait DataSet: Debug + Send + Sync {
    /// Type of every row in this data set.
    fn element_type(&self) -> &DataType;

    /// Materialize all rows.
    fn rows(&self) -> Result<Vec<Value>>;
}

/// Data set backed by an in-memory vector.
#[derive(Debug)]
pub struct MemoryDataSet {
    element_type: DataType,
    rows: Vec<Value>,
}

impl MemoryDataSet {
    pub fn new(element_type: DataType, rows: Vec<Value>) -> Self {
        MemoryDataSet { element_type, rows }
    }

    /// Create a data set, checking that every row matches the element type.
    pub fn try_new(element_type: DataType, rows: Vec<Value>) -> Result<Self> {
        for (idx, row) in rows.iter().enumerate() {
            if !row.is_null() && !element_type.is_assignable_from(&row.datatype()) {
                return Err(DbError::new(format!(
                    "Row {idx} has type '{}', expected '{element_type}'",
                    row.datatype()
                )));
            }
        }
        Ok(Self::new(element_type, rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl DataSet for MemoryDataSet {
    fn element_type(&self) -> &DataType {
        &self.element_type
    }

    fn rows(&self) -> Result<Vec<Value>> {
        Ok(self.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_checks_rows() {
        MemoryDataSet::try_new(DataType::Int64, vec![Value::Int32(1), Value::Int64(2)]).unwrap();
        MemoryDataSet::try_new(DataType::Int32, vec![Value::from("a")]).unwrap_err();
    }
}
