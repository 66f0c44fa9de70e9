//! Contract between the planner and the subsystem executing action plans.

pub mod actions;
pub mod engine;
pub mod service;

use uuid::Uuid;

use crate::core::model::ServiceState;
use crate::core::solution::{Action, ActionParameters, ActionType};
use crate::error::{Error, Result};

use self::actions::{ChangeServiceState, Migrate};

/// Capability interface over the compute cloud: the few primitives the
/// applier needs from the hypervisor control plane.
pub trait ComputeClient: Send {
    /// Hostname of the hypervisor currently running the instance.
    fn host_of_instance(&self, instance: Uuid) -> Result<String>;

    /// Live-migrates the instance to the destination host. Blocks until
    /// the migration completes or the client's own deadline expires, in
    /// which case an [`Error::Action`] is returned.
    fn live_migrate(&mut self, instance: Uuid, destination: &str) -> Result<()>;

    fn service_state(&self, hypervisor: Uuid) -> Result<ServiceState>;

    fn set_service_state(&mut self, hypervisor: Uuid, state: ServiceState) -> Result<()>;
}

/// An executable action built from an emitted [`Action`] record.
///
/// `execute` is idempotent where possible and `revert` is the best-effort
/// inverse; pre- and postconditions are best-effort checks around them.
pub trait ApplierAction {
    fn validate(&self) -> Result<()>;

    fn precondition(&self, client: &dyn ComputeClient) -> Result<()>;

    fn execute(&self, client: &mut dyn ComputeClient) -> Result<()>;

    fn revert(&self, client: &mut dyn ComputeClient) -> Result<()>;

    fn postcondition(&self, client: &dyn ComputeClient) -> Result<()>;
}

/// Builds the executable action for an emitted record, validating its
/// parameters. Records the applier must not accept fail with
/// [`Error::Schema`].
pub fn build_action(record: &Action) -> Result<Box<dyn ApplierAction>> {
    let action: Box<dyn ApplierAction> = match (record.action_type, &record.input_parameters) {
        (
            ActionType::Migrate,
            ActionParameters::Migration {
                migration_type,
                src_hypervisor,
                dst_hypervisor,
            },
        ) => Box::new(Migrate::new(
            record.resource_id,
            migration_type,
            src_hypervisor,
            dst_hypervisor,
        )),
        (ActionType::ChangeNovaServiceState, ActionParameters::ServiceState { state }) => {
            Box::new(ChangeServiceState::new(record.resource_id, *state))
        }
        _ => {
            return Err(Error::Schema(format!(
                "parameters do not match action type {}",
                record.action_type
            )))
        }
    };
    action.validate()?;
    Ok(action)
}
