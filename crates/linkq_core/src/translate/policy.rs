use std::fmt::Debug;

use crate::config::QueryConfig;
use crate::types::DataType;
use crate::values::Value;

/// How a constant or captured value is carried in a translated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentTreatment {
    /// Inlined as an IR constant, or an IR collection of constants.
    Inline,
    /// Mapped out to a dynamic value and snapshotted as a constant argument.
    Snapshot,
    /// Kept addressable by name so it can be replaced after translation.
    Variable,
}

/// Decides the treatment of values found in a query.
pub trait QueryArgumentPolicy: Debug + Send + Sync {
    /// `captured` is set if the value was read from a captured variable.
    fn treatment(&self, value: &Value, datatype: &DataType, captured: bool) -> ArgumentTreatment;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultArgumentPolicy {
    pub inline_collection_max_len: usize,
    pub captured_as_variables: bool,
}

impl DefaultArgumentPolicy {
    pub fn from_config(config: &QueryConfig) -> Self {
        DefaultArgumentPolicy {
            inline_collection_max_len: config.inline_collection_max_len,
            captured_as_variables: config.captured_as_variables,
        }
    }
}

impl Default for DefaultArgumentPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null
            | Value::Boolean(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Float64(_)
            | Value::Utf8(_)
            | Value::Timestamp(_)
            | Value::Uuid(_)
    )
}

impl QueryArgumentPolicy for DefaultArgumentPolicy {
    fn treatment(&self, value: &Value, _datatype: &DataType, captured: bool) -> ArgumentTreatment {
        if captured && self.captured_as_variables {
            return ArgumentTreatment::Variable;
        }
        match value {
            Value::Collection(c) if c.items.len() > self.inline_collection_max_len => {
                ArgumentTreatment::Variable
            }
            Value::Collection(c) if c.items.iter().all(is_scalar) => ArgumentTreatment::Inline,
            Value::Collection(_) | Value::Object(_) | Value::Grouping(_) => {
                ArgumentTreatment::Snapshot
            }
            _ => ArgumentTreatment::Inline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_thresholds() {
        let policy = DefaultArgumentPolicy {
            inline_collection_max_len: 2,
            captured_as_variables: true,
        };
        let ty = DataType::list(DataType::Int32);
        let short = Value::list([1.into(), 2.into()]);
        let long = Value::list([1.into(), 2.into(), 3.into()]);

        assert_eq!(ArgumentTreatment::Inline, policy.treatment(&short, &ty, false));
        assert_eq!(ArgumentTreatment::Variable, policy.treatment(&long, &ty, false));
        assert_eq!(ArgumentTreatment::Variable, policy.treatment(&short, &ty, true));
        assert_eq!(
            ArgumentTreatment::Inline,
            policy.treatment(&Value::Int32(1), &DataType::Int32, false)
        );
    }

    #[test]
    fn captured_snapshots_when_disabled() {
        let policy = DefaultArgumentPolicy {
            inline_collection_max_len: 32,
            captured_as_variables: false,
        };
        assert_eq!(
            ArgumentTreatment::Inline,
            policy.treatment(&Value::Int32(1), &DataType::Int32, true)
        );
    }
}
