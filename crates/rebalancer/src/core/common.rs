//! Common data structures shared across the planning core.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::core::model::Hypervisor;
use crate::core::vm::VirtualMachine;

/// Resource kinds accounted by the planner.
///
/// Each kind carries a capacity function over a hypervisor and a demand
/// function over a VM, so that multi-dimensional checks can iterate the
/// kinds uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    CpuCores,
    Memory,
    DiskCapacity,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::CpuCores,
        ResourceKind::Memory,
        ResourceKind::DiskCapacity,
    ];

    /// Declared capacity of a hypervisor for this kind.
    pub fn capacity_of(&self, hypervisor: &Hypervisor) -> f64 {
        match self {
            ResourceKind::CpuCores => hypervisor.cpu_cores as f64,
            ResourceKind::Memory => hypervisor.memory as f64,
            ResourceKind::DiskCapacity => hypervisor.disk as f64,
        }
    }

    /// Declared demand of a VM for this kind.
    pub fn demand_of(&self, vm: &VirtualMachine) -> f64 {
        match self {
            ResourceKind::CpuCores => vm.vcpus as f64,
            ResourceKind::Memory => vm.memory as f64,
            ResourceKind::DiskCapacity => vm.disk as f64,
        }
    }
}

/// A {cpu, ram, disk} triple, used both for measured utilization and for
/// declared capacities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
}

impl ResourceVector {
    pub fn new(cpu: f64, ram: f64, disk: f64) -> Self {
        Self { cpu, ram, disk }
    }

    pub fn component(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::CpuCores => self.cpu,
            ResourceKind::Memory => self.ram,
            ResourceKind::DiskCapacity => self.disk,
        }
    }
}

impl std::ops::AddAssign for ResourceVector {
    fn add_assign(&mut self, other: Self) {
        self.cpu += other.cpu;
        self.ram += other.ram;
        self.disk += other.disk;
    }
}

/// Capacity coefficients: the factor of declared capacity per resource kind
/// that the planner is willing to commit to. A factor of 1 means full
/// nominal capacity. All factors must be positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapacityFactors {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
}

impl Default for CapacityFactors {
    fn default() -> Self {
        Self {
            cpu: 1.,
            ram: 1.,
            disk: 1.,
        }
    }
}

impl CapacityFactors {
    pub fn new(cpu: f64, ram: f64, disk: f64) -> Self {
        assert!(
            cpu > 0. && ram > 0. && disk > 0.,
            "capacity factors must be positive"
        );
        Self { cpu, ram, disk }
    }

    pub fn component(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::CpuCores => self.cpu,
            ResourceKind::Memory => self.ram,
            ResourceKind::DiskCapacity => self.disk,
        }
    }
}
