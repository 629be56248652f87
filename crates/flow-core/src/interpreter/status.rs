//! Máquina de estados del flujo.
//!
//! `created → running → (completed | failed | suspended)` y
//! `suspended → running` vía resume; ninguna otra transición es legal. El
//! driver del intérprete asigna estado únicamente a través de `advance`, que
//! rechaza transiciones ilegales como violación de invariante del motor.

use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Suspended,
}

impl FlowStatus {
    pub fn can_transition(self, to: FlowStatus) -> bool {
        use FlowStatus::*;
        matches!((self, to),
                 (Created, Running) | (Running, Completed) | (Running, Failed) | (Running, Suspended)
                 | (Suspended, Running))
    }

    /// Transición validada. Una transición ilegal no es un error del
    /// workflow sino del motor, y se reporta como tal.
    pub fn advance(self, to: FlowStatus) -> Result<FlowStatus, FlowError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(FlowError::Execution { node_id: "flow".to_string(),
                                       node_kind: "status".to_string(),
                                       message: format!("illegal flow status transition {self:?} -> {to:?}") })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FlowStatus::*;

    #[test]
    fn legal_transitions() {
        assert!(Created.can_transition(Running));
        assert!(Running.can_transition(Suspended));
        assert!(Suspended.can_transition(Running));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Completed.can_transition(Running));
        assert!(!Created.can_transition(Completed));
        assert!(!Failed.can_transition(Running));
    }

    #[test]
    fn advance_returns_the_new_status_or_an_engine_error() {
        let running = Created.advance(Running).expect("created -> running");
        assert_eq!(running, Running);
        let err = Completed.advance(Running).expect_err("completed is terminal");
        assert_eq!(err.category(), "execution");
    }
}
