use linkq_error::{DbError, Result};

use super::response::QueryResponse;
use crate::dynamic::mapper::DynamicObjectMapper;
use crate::types::DataType;
use crate::values::{ObjectRef, Value};

/// Maps provider responses back into values of the expected type.
#[derive(Debug, Clone)]
pub struct ResultMapper {
    mapper: DynamicObjectMapper,
}

impl ResultMapper {
    pub fn new(mapper: DynamicObjectMapper) -> Self {
        ResultMapper { mapper }
    }

    /// Map a response. Error responses are raised as remote errors.
    pub fn map(&self, response: QueryResponse, datatype: &DataType) -> Result<Value> {
        let value = response.into_result()?;
        self.mapper.map_in(&value, Some(datatype))
    }
}

/// Conversion from a mapped query result to a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        value.try_as_bool()
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        value.try_as_i32()
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        value.try_as_i64()
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        value.try_as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Utf8(s) => Ok(s),
            other => Err(DbError::new(format!("Expected a string, got {other}"))),
        }
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(obj) => Ok(obj),
            other => Err(DbError::new(format!("Expected an object, got {other}"))),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        value.into_sequence()?.into_iter().map(T::from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::DynamicValue;
    use crate::query::response::RemoteError;
    use crate::testutil::TestModel;

    #[test]
    fn scalars_and_sequences() {
        let model = TestModel::new();
        let mapper = ResultMapper::new(model.mapper());

        let count = mapper
            .map(QueryResponse::Value(DynamicValue::Int64(3)), &DataType::Int32)
            .unwrap();
        assert_eq!(3, i32::from_value(count).unwrap());

        let list = mapper
            .map(
                QueryResponse::Value(DynamicValue::list([
                    DynamicValue::Int32(1),
                    DynamicValue::Null,
                ])),
                &DataType::list(DataType::nullable(DataType::Int32)),
            )
            .unwrap();
        assert_eq!(
            vec![Some(1), None],
            Vec::<Option<i32>>::from_value(list).unwrap()
        );
    }

    #[test]
    fn error_responses_raised() {
        let model = TestModel::new();
        let mapper = ResultMapper::new(model.mapper());
        let err = mapper
            .map(
                QueryResponse::Error(RemoteError {
                    type_name: "DivideByZero".to_string(),
                    message: "attempted to divide by zero".to_string(),
                }),
                &DataType::Int32,
            )
            .unwrap_err();
        assert_eq!("DivideByZero", err.type_name());
    }
}
