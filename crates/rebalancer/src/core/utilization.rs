//! Utilization accounting over the cluster model and the metrics oracle.

use std::cell::RefCell;
use std::collections::HashMap;

use uuid::Uuid;

use crate::core::common::{ResourceKind, ResourceVector};
use crate::core::metrics::{Aggregation, MetricsSource, StatisticsReader};
use crate::core::model::{ClusterModel, Hypervisor, ServiceState};
use crate::core::vm::VirtualMachine;
use crate::error::{Error, Result};

/// Computes per-VM, per-hypervisor and cluster-relative utilization.
///
/// Per-VM results are memoized for the lifetime of the accountant, which is
/// one planner run: VM consumption does not depend on placement, so the
/// cache stays valid while the speculative model is being mutated. The
/// accountant is never shared across runs.
pub struct UtilizationAccountant {
    reader: StatisticsReader,
    cache: RefCell<HashMap<Uuid, ResourceVector>>,
}

impl UtilizationAccountant {
    pub fn new(source: Box<dyn MetricsSource>, period_secs: u64, aggregation: Aggregation) -> Self {
        Self {
            reader: StatisticsReader::new(source, period_secs, aggregation),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Measured {cpu, ram, disk} consumption of a VM.
    ///
    /// CPU is converted from the reported percentage to consumed cores; a VM
    /// with no CPU signal is accounted at its full declared vCPU count.
    /// Missing memory and disk signals abort the audit.
    pub fn vm_utilization(&self, vm: &VirtualMachine) -> Result<ResourceVector> {
        if let Some(cached) = self.cache.borrow().get(&vm.uuid) {
            return Ok(*cached);
        }

        let vcpus = ResourceKind::CpuCores.demand_of(vm);
        let cpu = match self.reader.vm_cpu_percent(vm.uuid) {
            Some(percent) => vcpus * percent / 100.,
            // no signal, assume the worst case
            None => vcpus,
        };
        let ram = self.reader.vm_memory(vm.uuid)?;
        let disk = self.reader.vm_root_disk(vm.uuid)?;

        let utilization = ResourceVector::new(cpu, ram, disk);
        self.cache.borrow_mut().insert(vm.uuid, utilization);
        Ok(utilization)
    }

    /// Aggregate consumption of all VMs placed on a host. An empty host
    /// reports a zero vector.
    pub fn hypervisor_utilization(
        &self,
        model: &ClusterModel,
        hypervisor: &Hypervisor,
    ) -> Result<ResourceVector> {
        let mut total = ResourceVector::default();
        for vm_uuid in model.mapping().vms_of(hypervisor.uuid) {
            let vm = model
                .get_vm(vm_uuid)
                .ok_or_else(|| Error::ModelInconsistency(format!("unknown vm {}", vm_uuid)))?;
            total += self.vm_utilization(vm)?;
        }
        Ok(total)
    }

    /// Declared capacities of a host as a {cpu, ram, disk} vector.
    pub fn hypervisor_capacity(&self, hypervisor: &Hypervisor) -> ResourceVector {
        ResourceVector::new(
            ResourceKind::CpuCores.capacity_of(hypervisor),
            ResourceKind::Memory.capacity_of(hypervisor),
            ResourceKind::DiskCapacity.capacity_of(hypervisor),
        )
    }

    /// Componentwise utilization/capacity of a host, each component in [0, 1]
    /// for a host within its nominal capacity.
    pub fn relative_hypervisor_utilization(
        &self,
        model: &ClusterModel,
        hypervisor: &Hypervisor,
    ) -> Result<ResourceVector> {
        let utilization = self.hypervisor_utilization(model, hypervisor)?;
        let capacity = self.hypervisor_capacity(hypervisor);
        Ok(ResourceVector::new(
            utilization.cpu / capacity.cpu,
            utilization.ram / capacity.ram,
            utilization.disk / capacity.disk,
        ))
    }

    /// Arithmetic mean of relative host utilization across hosts that are
    /// administratively up. A cluster with no host up reports zero.
    pub fn relative_cluster_utilization(&self, model: &ClusterModel) -> Result<ResourceVector> {
        let mut total = ResourceVector::default();
        let mut online = 0;
        for hypervisor in model.get_all_hypervisors() {
            if hypervisor.state != ServiceState::Up {
                continue;
            }
            total += self.relative_hypervisor_utilization(model, hypervisor)?;
            online += 1;
        }
        if online == 0 {
            return Ok(ResourceVector::default());
        }
        let n = online as f64;
        Ok(ResourceVector::new(total.cpu / n, total.ram / n, total.disk / n))
    }
}
