//! Statistic-aggregation oracle and the typed meter adapter.

use dyn_clone::{clone_trait_object, DynClone};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The closed set of meters the planner consumes. Unknown meter names are
/// unrepresentable; the string forms below are the wire names of the
/// metrics backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Meter {
    /// VM CPU utilization, percent 0-100.
    #[strum(serialize = "cpu_util")]
    #[serde(rename = "cpu_util")]
    CpuUtil,
    /// VM memory usage, MB.
    #[strum(serialize = "memory.usage")]
    #[serde(rename = "memory.usage")]
    MemoryUsage,
    /// VM memory allocation, MB. Fallback when usage is not reported.
    #[strum(serialize = "memory")]
    #[serde(rename = "memory")]
    Memory,
    /// VM root disk size, bytes.
    #[strum(serialize = "disk.root.size")]
    #[serde(rename = "disk.root.size")]
    DiskRootSize,
    /// Hypervisor CPU utilization, percent 0-100.
    #[strum(serialize = "compute.node.cpu.percent")]
    #[serde(rename = "compute.node.cpu.percent")]
    ComputeNodeCpuPercent,
}

/// Statistic aggregation applied by the oracle over the query period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Aggregation {
    Avg,
    Min,
    Max,
}

/// Read-only oracle mapping (resource, meter, period, aggregation) to a
/// scalar. `None` means the backend holds no data for the query.
pub trait MetricsSource: DynClone {
    fn aggregate(
        &self,
        resource_id: Uuid,
        meter: Meter,
        period_secs: u64,
        aggregation: Aggregation,
    ) -> Option<f64>;
}

clone_trait_object!(MetricsSource);

/// Typed adapter over a [`MetricsSource`] with a fixed period and
/// aggregation, exposing one accessor per consumed signal.
pub struct StatisticsReader {
    source: Box<dyn MetricsSource>,
    period_secs: u64,
    aggregation: Aggregation,
}

impl StatisticsReader {
    pub fn new(source: Box<dyn MetricsSource>, period_secs: u64, aggregation: Aggregation) -> Self {
        Self {
            source,
            period_secs,
            aggregation,
        }
    }

    /// VM CPU utilization in percent, if reported.
    pub fn vm_cpu_percent(&self, vm: Uuid) -> Option<f64> {
        self.get(vm, Meter::CpuUtil)
    }

    /// VM memory consumption in MB: measured usage, falling back to the
    /// reported allocation.
    pub fn vm_memory(&self, vm: Uuid) -> Result<f64> {
        self.get(vm, Meter::MemoryUsage)
            .or_else(|| self.get(vm, Meter::Memory))
            .ok_or(Error::NoDataFound {
                resource_id: vm,
                meter: Meter::MemoryUsage,
            })
    }

    /// VM root disk size in bytes.
    pub fn vm_root_disk(&self, vm: Uuid) -> Result<f64> {
        self.get(vm, Meter::DiskRootSize).ok_or(Error::NoDataFound {
            resource_id: vm,
            meter: Meter::DiskRootSize,
        })
    }

    /// Hypervisor CPU utilization in percent, if reported.
    pub fn node_cpu_percent(&self, hypervisor: Uuid) -> Option<f64> {
        self.get(hypervisor, Meter::ComputeNodeCpuPercent)
    }

    fn get(&self, resource_id: Uuid, meter: Meter) -> Option<f64> {
        self.source
            .aggregate(resource_id, meter, self.period_secs, self.aggregation)
    }
}
