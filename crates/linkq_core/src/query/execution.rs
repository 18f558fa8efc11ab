use std::fmt;

use linkq_error::{DbError, Result};
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Unmaterialized,
    Translating,
    Providing,
    Mapping,
    Materialized,
    Failed,
}

impl ExecutionState {
    fn can_advance_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Unmaterialized, Translating)
                | (Translating, Providing)
                | (Providing, Mapping)
                // Streams go back for the next element.
                | (Mapping, Providing)
                | (Mapping, Materialized)
                | (Providing, Materialized)
        ) || (next == Failed && !matches!(self, Materialized | Failed))
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unmaterialized => "unmaterialized",
            Self::Translating => "translating",
            Self::Providing => "providing",
            Self::Mapping => "mapping",
            Self::Materialized => "materialized",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Tracks a single execution of a deferred query.
#[derive(Debug)]
pub struct QueryExecution {
    id: Uuid,
    state: ExecutionState,
}

impl Default for QueryExecution {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecution {
    pub fn new() -> Self {
        QueryExecution {
            id: Uuid::new_v4(),
            state: ExecutionState::Unmaterialized,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn advance(&mut self, next: ExecutionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(DbError::new(format!(
                "Invalid query state transition from {} to {next}",
                self.state
            )));
        }
        trace!(query_id = %self.id, from = %self.state, to = %next, "query state");
        self.state = next;
        Ok(())
    }

    /// Move to the failed state, handing back the error.
    pub fn fail(&mut self, error: DbError) -> DbError {
        if self.state.can_advance_to(ExecutionState::Failed) {
            trace!(query_id = %self.id, from = %self.state, %error, "query failed");
            self.state = ExecutionState::Failed;
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut exec = QueryExecution::new();
        exec.advance(ExecutionState::Translating).unwrap();
        exec.advance(ExecutionState::Providing).unwrap();
        exec.advance(ExecutionState::Mapping).unwrap();
        exec.advance(ExecutionState::Materialized).unwrap();

        exec.advance(ExecutionState::Translating).unwrap_err();
        let _ = exec.fail(DbError::new("late"));
        assert_eq!(ExecutionState::Materialized, exec.state());
    }

    #[test]
    fn skipping_translation_rejected() {
        let mut exec = QueryExecution::new();
        exec.advance(ExecutionState::Providing).unwrap_err();
        let err = exec.fail(DbError::new("boom"));
        assert_eq!("boom", err.message());
        assert_eq!(ExecutionState::Failed, exec.state());
    }
}
