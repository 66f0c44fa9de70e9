//! In-memory snapshot of the cluster: hypervisors, VMs and their mapping.

use indexmap::map::IndexMap;
use indexmap::set::IndexSet;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::core::vm::VirtualMachine;
use crate::error::{Error, Result};

/// Administrative state of a hypervisor compute service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    Up,
    Down,
}

impl ServiceState {
    pub fn inverse(&self) -> ServiceState {
        match self {
            ServiceState::Up => ServiceState::Down,
            ServiceState::Down => ServiceState::Up,
        }
    }
}

/// Represents a compute host with its declared resource capacities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypervisor {
    pub uuid: Uuid,
    pub hostname: String,
    pub state: ServiceState,
    pub cpu_cores: u32,
    pub memory: u64,
    pub disk: u64,
}

impl Hypervisor {
    /// Creates an online hypervisor with the given declared capacities.
    pub fn new(uuid: Uuid, hostname: &str, cpu_cores: u32, memory: u64, disk: u64) -> Self {
        Self {
            uuid,
            hostname: hostname.to_string(),
            state: ServiceState::Up,
            cpu_cores,
            memory,
            disk,
        }
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.state = state;
        self
    }
}

/// The VM-to-hypervisor placement relation.
///
/// Every VM is mapped to exactly one host. Unmapping and mapping a VM within
/// one migration is atomic from the planner's perspective: both either
/// succeed or the model is left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    vm_to_host: IndexMap<Uuid, Uuid>,
    host_to_vms: IndexMap<Uuid, IndexSet<Uuid>>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host so that an empty host still reports an empty VM set.
    pub fn add_host(&mut self, host: Uuid) {
        self.host_to_vms.entry(host).or_default();
    }

    /// Maps a VM onto a host. Fails if the VM is already mapped.
    pub fn map(&mut self, host: Uuid, vm: Uuid) -> Result<()> {
        if let Some(current) = self.vm_to_host.get(&vm) {
            return Err(Error::ModelInconsistency(format!(
                "cannot map vm {}: already mapped to host {}",
                vm, current
            )));
        }
        self.vm_to_host.insert(vm, host);
        self.host_to_vms.entry(host).or_default().insert(vm);
        Ok(())
    }

    /// Unmaps a VM from a host. Fails if the VM is not mapped to that host.
    pub fn unmap(&mut self, host: Uuid, vm: Uuid) -> Result<()> {
        match self.vm_to_host.get(&vm) {
            Some(current) if *current == host => {
                self.vm_to_host.remove(&vm);
                self.host_to_vms.entry(host).or_default().remove(&vm);
                Ok(())
            }
            Some(current) => Err(Error::ModelInconsistency(format!(
                "cannot unmap vm {} from host {}: mapped to host {}",
                vm, host, current
            ))),
            None => Err(Error::ModelInconsistency(format!(
                "cannot unmap vm {} from host {}: not mapped",
                vm, host
            ))),
        }
    }

    /// Returns the VMs currently placed on the host, in mapping order.
    pub fn vms_of(&self, host: Uuid) -> Vec<Uuid> {
        self.host_to_vms
            .get(&host)
            .map(|vms| vms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the host the VM is currently placed on.
    pub fn host_of(&self, vm: Uuid) -> Option<Uuid> {
        self.vm_to_host.get(&vm).cloned()
    }
}

/// Cluster snapshot owning the hypervisor set, the VM set and the mapping.
///
/// The model is a plain value: cloning it produces a fully independent copy,
/// which is how the planner obtains a speculative model to mutate without
/// side effects on the original.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    hypervisors: IndexMap<Uuid, Hypervisor>,
    vms: IndexMap<Uuid, VirtualMachine>,
    mapping: Mapping,
}

impl ClusterModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hypervisor(&mut self, hypervisor: Hypervisor) {
        self.mapping.add_host(hypervisor.uuid);
        self.hypervisors.insert(hypervisor.uuid, hypervisor);
    }

    /// Adds a VM and maps it onto the given host.
    pub fn add_vm(&mut self, vm: VirtualMachine, host: Uuid) -> Result<()> {
        let uuid = vm.uuid;
        self.vms.insert(uuid, vm);
        self.mapping.map(host, uuid)
    }

    /// All hypervisors in insertion order.
    pub fn get_all_hypervisors(&self) -> Vec<&Hypervisor> {
        self.hypervisors.values().collect()
    }

    pub fn get_hypervisor(&self, uuid: Uuid) -> Option<&Hypervisor> {
        self.hypervisors.get(&uuid)
    }

    pub fn get_vm(&self, uuid: Uuid) -> Option<&VirtualMachine> {
        self.vms.get(&uuid)
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Moves a VM between hosts, updating the mapping atomically.
    pub fn migrate_vm(&mut self, vm: Uuid, src: Uuid, dst: Uuid) -> Result<()> {
        self.mapping.unmap(src, vm)?;
        self.mapping.map(dst, vm)
    }

    /// Flips the administrative state of a hypervisor. Confined to
    /// speculative models built by the planner.
    pub fn set_hypervisor_state(&mut self, uuid: Uuid, state: ServiceState) -> Result<()> {
        match self.hypervisors.get_mut(&uuid) {
            Some(hypervisor) => {
                hypervisor.state = state;
                Ok(())
            }
            None => Err(Error::ModelInconsistency(format!(
                "unknown hypervisor {}",
                uuid
            ))),
        }
    }
}
