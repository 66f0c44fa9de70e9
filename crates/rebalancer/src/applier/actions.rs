//! Executable remediation actions.

use log::debug;
use uuid::Uuid;

use crate::applier::{ApplierAction, ComputeClient};
use crate::core::model::ServiceState;
use crate::core::solution::LIVE_MIGRATION;
use crate::error::{Error, Result};

/// Live migration of one instance between two hypervisors.
pub struct Migrate {
    instance: Uuid,
    migration_type: String,
    src_hypervisor: String,
    dst_hypervisor: String,
}

impl Migrate {
    pub fn new(instance: Uuid, migration_type: &str, src_hypervisor: &str, dst_hypervisor: &str) -> Self {
        Self {
            instance,
            migration_type: migration_type.to_string(),
            src_hypervisor: src_hypervisor.to_string(),
            dst_hypervisor: dst_hypervisor.to_string(),
        }
    }

    /// Moves the instance to the given host, unless it is already there.
    fn migrate(&self, client: &mut dyn ComputeClient, destination: &str) -> Result<()> {
        if client.host_of_instance(self.instance)? == destination {
            debug!("instance {} is already on {}", self.instance, destination);
            return Ok(());
        }
        client.live_migrate(self.instance, destination)
    }
}

impl ApplierAction for Migrate {
    fn validate(&self) -> Result<()> {
        if self.instance.is_nil() {
            return Err(Error::Schema("resource_id is not a valid uuid".to_string()));
        }
        if self.migration_type != LIVE_MIGRATION {
            return Err(Error::Schema(format!(
                "migration of type {} is not supported",
                self.migration_type
            )));
        }
        if self.src_hypervisor.is_empty() || self.dst_hypervisor.is_empty() {
            return Err(Error::Schema(
                "src_hypervisor and dst_hypervisor must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    fn precondition(&self, client: &dyn ComputeClient) -> Result<()> {
        // the instance must be known to the compute service
        client.host_of_instance(self.instance).map(|_| ())
    }

    fn execute(&self, client: &mut dyn ComputeClient) -> Result<()> {
        self.migrate(client, &self.dst_hypervisor)
    }

    fn revert(&self, client: &mut dyn ComputeClient) -> Result<()> {
        self.migrate(client, &self.src_hypervisor)
    }

    fn postcondition(&self, client: &dyn ComputeClient) -> Result<()> {
        let host = client.host_of_instance(self.instance)?;
        if host != self.dst_hypervisor {
            return Err(Error::Action(format!(
                "instance {} ended up on {} instead of {}",
                self.instance, host, self.dst_hypervisor
            )));
        }
        Ok(())
    }
}

/// Administrative state change of a hypervisor compute service.
pub struct ChangeServiceState {
    hypervisor: Uuid,
    state: ServiceState,
}

impl ChangeServiceState {
    pub fn new(hypervisor: Uuid, state: ServiceState) -> Self {
        Self { hypervisor, state }
    }

    fn assert_state(&self, client: &mut dyn ComputeClient, state: ServiceState) -> Result<()> {
        if client.service_state(self.hypervisor)? == state {
            debug!("hypervisor {} is already {}", self.hypervisor, state);
            return Ok(());
        }
        client.set_service_state(self.hypervisor, state)
    }
}

impl ApplierAction for ChangeServiceState {
    fn validate(&self) -> Result<()> {
        if self.hypervisor.is_nil() {
            return Err(Error::Schema("resource_id is not a valid uuid".to_string()));
        }
        Ok(())
    }

    fn precondition(&self, client: &dyn ComputeClient) -> Result<()> {
        client.service_state(self.hypervisor).map(|_| ())
    }

    fn execute(&self, client: &mut dyn ComputeClient) -> Result<()> {
        self.assert_state(client, self.state)
    }

    fn revert(&self, client: &mut dyn ComputeClient) -> Result<()> {
        self.assert_state(client, self.state.inverse())
    }

    fn postcondition(&self, client: &dyn ComputeClient) -> Result<()> {
        let state = client.service_state(self.hypervisor)?;
        if state != self.state {
            return Err(Error::Action(format!(
                "hypervisor {} is {} instead of {}",
                self.hypervisor, state, self.state
            )));
        }
        Ok(())
    }
}
