//! Representation of a virtual machine and its runtime state.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Runtime state of a virtual machine as reported by the compute service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VmState {
    Active,
    Paused,
    Suspended,
    Stopped,
    Error,
}

/// Represents a virtual machine with its declared resource demand.
///
/// The declared demand (vCPUs, memory, root disk) is the upper bound the VM
/// may consume; the actual consumption comes from the metrics oracle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub uuid: Uuid,
    pub state: VmState,
    pub vcpus: u32,
    pub memory: u64,
    pub disk: u64,
}

impl VirtualMachine {
    /// Creates an active VM with the given declared demand.
    pub fn new(uuid: Uuid, vcpus: u32, memory: u64, disk: u64) -> Self {
        Self {
            uuid,
            state: VmState::Active,
            vcpus,
            memory,
            disk,
        }
    }

    pub fn with_state(mut self, state: VmState) -> Self {
        self.state = state;
        self
    }
}
