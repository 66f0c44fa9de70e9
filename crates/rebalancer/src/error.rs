//! Contract-level errors.

use thiserror::Error;
use uuid::Uuid;

use crate::core::metrics::Meter;
use crate::core::vm::VmState;
use crate::plan::PlanState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The metrics oracle is missing a signal the planner requires.
    /// Aborts the current audit without mutating persisted plans.
    #[error("no {meter} data found for resource {resource_id}")]
    NoDataFound { resource_id: Uuid, meter: Meter },

    /// Live migration was attempted for a VM that is not active.
    #[error("cannot live-migrate vm {uuid} in state {state}")]
    InvalidVmState { uuid: Uuid, state: VmState },

    /// Mapping invariants were violated. This is a programming error.
    #[error("cluster model inconsistency: {0}")]
    ModelInconsistency(String),

    /// Action parameters failed schema validation.
    #[error("invalid action parameters: {0}")]
    Schema(String),

    /// Runtime failure while executing or reverting an action.
    #[error("action failed: {0}")]
    Action(String),

    /// The requested action plan state transition is not admissible.
    #[error("illegal action plan transition: {from} -> {to}")]
    IllegalTransition { from: PlanState, to: PlanState },

    /// Unknown plan, action or resource.
    #[error("not found: {0}")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;
