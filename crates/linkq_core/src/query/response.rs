use linkq_error::{DbError, Result};
use serde::{Deserialize, Serialize};

use crate::dynamic::DynamicValue;

/// An error carried through the result channel as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub type_name: String,
    pub message: String,
}

impl RemoteError {
    pub fn from_error(error: &DbError) -> Self {
        RemoteError {
            type_name: error.type_name().to_string(),
            message: error.message().to_string(),
        }
    }

    /// Error to raise on the receiving side, keeping the original type name
    /// and message.
    pub fn into_error(self) -> DbError {
        DbError::remote(self.type_name, self.message)
    }
}

/// What a data provider hands back for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload")]
pub enum QueryResponse {
    Value(DynamicValue),
    Error(RemoteError),
}

impl QueryResponse {
    pub fn error(error: &DbError) -> Self {
        QueryResponse::Error(RemoteError::from_error(error))
    }

    pub fn into_result(self) -> Result<DynamicValue> {
        match self {
            QueryResponse::Value(v) => Ok(v),
            QueryResponse::Error(e) => Err(e.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use linkq_error::ErrorKind;

    use super::*;

    #[test]
    fn error_survives_json() {
        let err = DbError::invalid_operation("sequence contains no matching element");
        let json = serde_json::to_string(&QueryResponse::error(&err)).unwrap();
        let response: QueryResponse = serde_json::from_str(&json).unwrap();

        let err = response.into_result().unwrap_err();
        assert_eq!(
            &ErrorKind::Remote {
                type_name: "InvalidOperation".to_string()
            },
            err.kind()
        );
        assert_eq!("InvalidOperation", err.type_name());
        assert_eq!("sequence contains no matching element", err.message());
    }
}
