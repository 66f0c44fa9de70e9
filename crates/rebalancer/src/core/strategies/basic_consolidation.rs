//! Consolidation strategy: offload overloaded hosts, pack the remaining
//! load onto fewer hosts, collapse redundant migrations and power down
//! emptied hosts.

use std::collections::HashMap;

use indexmap::map::IndexMap;
use log::{debug, info};
use uuid::Uuid;

use crate::core::common::{CapacityFactors, ResourceKind};
use crate::core::config::AuditConfig;
use crate::core::metrics::{Aggregation, MetricsSource};
use crate::core::model::{ClusterModel, Hypervisor, ServiceState};
use crate::core::solution::{Action, ActionParameters, ActionType, Solution};
use crate::core::strategy::Strategy;
use crate::core::utilization::UtilizationAccountant;
use crate::core::vm::{VirtualMachine, VmState};
use crate::error::{Error, Result};

/// CPU-primary consolidation with RAM/disk feasibility.
///
/// The planner runs four steps in order on a clone of the input model:
/// an offload phase relieving hosts that exceed their CPU budget, a
/// consolidation phase packing VMs from the least utilized hosts onto the
/// most utilized ones, a post-processing step collapsing migration chains,
/// and the deactivation of hosts left without VMs.
pub struct BasicConsolidation {
    metrics: Box<dyn MetricsSource>,
    factors: CapacityFactors,
    period_secs: u64,
    aggregation: Aggregation,
}

impl BasicConsolidation {
    pub fn new(metrics: Box<dyn MetricsSource>, factors: CapacityFactors) -> Self {
        Self {
            metrics,
            factors,
            period_secs: 3600,
            aggregation: Aggregation::Avg,
        }
    }

    pub fn from_config(config: &AuditConfig, metrics: Box<dyn MetricsSource>) -> Self {
        Self {
            metrics,
            factors: config.capacity_factors(),
            period_secs: config.metrics_period_secs,
            aggregation: config.aggregation,
        }
    }

    /// Builds the per-run utilization accountant over the strategy's
    /// metrics source.
    pub fn accountant(&self) -> UtilizationAccountant {
        UtilizationAccountant::new(
            dyn_clone::clone_box(&*self.metrics),
            self.period_secs,
            self.aggregation,
        )
    }

    /// A host is overloaded when its CPU consumption exceeds the CPU budget
    /// (declared capacity scaled by the CPU factor). Only CPU gates
    /// overload; RAM and disk drive fit.
    pub fn is_overloaded(
        &self,
        accountant: &UtilizationAccountant,
        model: &ClusterModel,
        host: Uuid,
    ) -> Result<bool> {
        let hypervisor = get_hypervisor(model, host)?;
        let utilization = accountant.hypervisor_utilization(model, hypervisor)?;
        let capacity = accountant.hypervisor_capacity(hypervisor);
        Ok(utilization.cpu > capacity.cpu * self.factors.cpu)
    }

    /// A VM fits on a host when, for every resource kind, the host's
    /// consumption plus the VM's consumption stays within the scaled
    /// capacity. The check is inclusive: a destination filled exactly to
    /// the budget still fits.
    pub fn vm_fits(
        &self,
        accountant: &UtilizationAccountant,
        model: &ClusterModel,
        vm: Uuid,
        host: Uuid,
    ) -> Result<bool> {
        let hypervisor = get_hypervisor(model, host)?;
        let utilization = accountant.hypervisor_utilization(model, hypervisor)?;
        let capacity = accountant.hypervisor_capacity(hypervisor);
        let vm_utilization = accountant.vm_utilization(get_vm(model, vm)?)?;
        for kind in ResourceKind::ALL {
            let budget = capacity.component(kind) * self.factors.component(kind);
            if utilization.component(kind) + vm_utilization.component(kind) > budget {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves the VM in the speculative model and records the migration.
    /// Only active VMs can be live-migrated.
    fn add_migration(
        &self,
        solution: &mut Solution,
        vm: Uuid,
        src: Uuid,
        dst: Uuid,
    ) -> Result<()> {
        let vm_record = get_vm(solution.model(), vm)?;
        if vm_record.state != VmState::Active {
            return Err(Error::InvalidVmState {
                uuid: vm,
                state: vm_record.state,
            });
        }
        let src_hostname = get_hypervisor(solution.model(), src)?.hostname.clone();
        let dst_hostname = get_hypervisor(solution.model(), dst)?.hostname.clone();
        solution.model_mut().migrate_vm(vm, src, dst)?;
        debug!("migrating vm {} from {} to {}", vm, src_hostname, dst_hostname);
        solution.add_action(Action::live_migration(vm, &src_hostname, &dst_hostname));
        Ok(())
    }

    /// Emits the power-up action for an offline destination and flips its
    /// state in the speculative model.
    fn reactivate_hypervisor(&self, solution: &mut Solution, host: Uuid) -> Result<()> {
        debug!("reactivating hypervisor {}", host);
        solution.add_action(Action::change_service_state(host, ServiceState::Up));
        solution.model_mut().set_hypervisor_state(host, ServiceState::Up)
    }

    /// Hosts ordered by ascending CPU consumption at call time.
    fn hosts_by_cpu_utilization(
        &self,
        accountant: &UtilizationAccountant,
        model: &ClusterModel,
    ) -> Result<Vec<Uuid>> {
        let mut hosts = Vec::new();
        for hypervisor in model.get_all_hypervisors() {
            let utilization = accountant.hypervisor_utilization(model, hypervisor)?;
            hosts.push((hypervisor.uuid, utilization.cpu));
        }
        hosts.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(hosts.into_iter().map(|(uuid, _)| uuid).collect())
    }

    /// VMs of a host ordered by their CPU consumption.
    fn vms_by_cpu_utilization(
        &self,
        accountant: &UtilizationAccountant,
        model: &ClusterModel,
        host: Uuid,
        descending: bool,
    ) -> Result<Vec<Uuid>> {
        let mut vms = Vec::new();
        for vm_uuid in model.mapping().vms_of(host) {
            let utilization = accountant.vm_utilization(get_vm(model, vm_uuid)?)?;
            vms.push((vm_uuid, utilization.cpu));
        }
        vms.sort_by(|a, b| a.1.total_cmp(&b.1));
        if descending {
            vms.reverse();
        }
        Ok(vms.into_iter().map(|(uuid, _)| uuid).collect())
    }

    /// Offload phase: first-fit bin packing relieving overloaded hosts.
    ///
    /// Hosts are walked from the most CPU-utilized end. The least utilized
    /// VMs of an overloaded host leave first (their live migration is the
    /// cheapest), scanning destinations from the most utilized end so that
    /// load concentrates on already-busy hosts. An offline destination is
    /// powered up before the migration into it.
    pub fn offload_phase(
        &self,
        accountant: &UtilizationAccountant,
        solution: &mut Solution,
    ) -> Result<()> {
        let hosts = self.hosts_by_cpu_utilization(accountant, solution.model())?;
        for &src in hosts.iter().rev() {
            if !self.is_overloaded(accountant, solution.model(), src)? {
                continue;
            }
            let vms = self.vms_by_cpu_utilization(accountant, solution.model(), src, false)?;
            for vm in vms {
                for &dst in hosts.iter().rev() {
                    if dst == src {
                        continue;
                    }
                    if self.vm_fits(accountant, solution.model(), vm, dst)? {
                        if get_hypervisor(solution.model(), dst)?.state == ServiceState::Down {
                            self.reactivate_hypervisor(solution, dst)?;
                        }
                        self.add_migration(solution, vm, src, dst)?;
                        break;
                    }
                }
                if !self.is_overloaded(accountant, solution.model(), src)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Consolidation phase: pack the load of the least utilized hosts onto
    /// the most utilized hosts that can accommodate it.
    ///
    /// The most CPU-consuming VMs move first, since their load is the
    /// hardest to place; lighter VMs can later fill the remaining gaps.
    /// The `asc < dsc` guard keeps sources and destinations on opposite
    /// sides of the utilization order, which guarantees monotone progress.
    pub fn consolidation_phase(
        &self,
        accountant: &UtilizationAccountant,
        solution: &mut Solution,
    ) -> Result<()> {
        let hosts = self.hosts_by_cpu_utilization(accountant, solution.model())?;
        for (asc, &src) in hosts.iter().enumerate() {
            let vms = self.vms_by_cpu_utilization(accountant, solution.model(), src, true)?;
            for vm in vms {
                let mut current = src;
                for dsc in ((asc + 1)..hosts.len()).rev() {
                    let dst = hosts[dsc];
                    // packing never powers a host back up
                    if get_hypervisor(solution.model(), dst)?.state == ServiceState::Down {
                        continue;
                    }
                    if self.vm_fits(accountant, solution.model(), vm, dst)? {
                        self.add_migration(solution, vm, current, dst)?;
                        current = dst;
                    }
                }
            }
        }
        Ok(())
    }

    /// Collapses every multi-step migration chain to a single migration
    /// from the chain's first source to its last destination, dropping the
    /// chain entirely when they coincide. Removals are order-stable; the
    /// speculative model already reflects the final placement.
    pub fn optimize_solution(&self, solution: &mut Solution) {
        let mut per_vm: IndexMap<Uuid, Vec<usize>> = IndexMap::new();
        for (i, action) in solution.actions().iter().enumerate() {
            if action.action_type == ActionType::Migrate {
                per_vm.entry(action.resource_id).or_default().push(i);
            }
        }

        let mut dropped = vec![false; solution.actions().len()];
        let mut rewritten: HashMap<usize, Action> = HashMap::new();
        for (vm, indices) in per_vm {
            if indices.len() < 2 {
                continue;
            }
            let first = indices[0];
            let last = indices[indices.len() - 1];
            let first_src = migration_source(&solution.actions()[first]);
            let last_dst = migration_destination(&solution.actions()[last]);
            if first_src == last_dst {
                debug!("dropping circular migration chain of vm {}", vm);
                for i in indices {
                    dropped[i] = true;
                }
            } else {
                debug!(
                    "collapsing {} migrations of vm {} into {} -> {}",
                    indices.len(),
                    vm,
                    first_src,
                    last_dst
                );
                rewritten.insert(first, Action::live_migration(vm, &first_src, &last_dst));
                for i in &indices[1..] {
                    dropped[*i] = true;
                }
            }
        }

        let actions = solution
            .actions()
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped[*i])
            .map(|(i, action)| rewritten.remove(&i).unwrap_or_else(|| action.clone()))
            .collect();
        solution.replace_actions(actions);
    }

    /// Powers down every host that is still up and holds no VMs under the
    /// final placement.
    pub fn deactivate_unused_hypervisors(&self, solution: &mut Solution) -> Result<()> {
        let unused: Vec<Uuid> = solution
            .model()
            .get_all_hypervisors()
            .iter()
            .filter(|h| h.state == ServiceState::Up && solution.model().mapping().vms_of(h.uuid).is_empty())
            .map(|h| h.uuid)
            .collect();
        for host in unused {
            debug!("deactivating unused hypervisor {}", host);
            solution.add_action(Action::change_service_state(host, ServiceState::Down));
            solution.model_mut().set_hypervisor_state(host, ServiceState::Down)?;
        }
        Ok(())
    }
}

impl Strategy for BasicConsolidation {
    fn name(&self) -> &str {
        "basic_consolidation"
    }

    fn execute(&self, original: &ClusterModel) -> Result<Solution> {
        info!("executing consolidation strategy");
        let accountant = self.accountant();
        let mut solution = Solution::new(original.clone());

        self.offload_phase(&accountant, &mut solution)?;
        self.consolidation_phase(&accountant, &mut solution)?;
        self.optimize_solution(&mut solution);
        self.deactivate_unused_hypervisors(&mut solution)?;

        let rcu = accountant.relative_cluster_utilization(solution.model())?;
        solution.set_efficacy(rcu.cpu);
        info!(
            "planned {} actions ({} migrations), efficacy {:.3}",
            solution.actions().len(),
            solution.migration_count(),
            solution.efficacy()
        );
        Ok(solution)
    }
}

fn get_hypervisor(model: &ClusterModel, uuid: Uuid) -> Result<&Hypervisor> {
    model
        .get_hypervisor(uuid)
        .ok_or_else(|| Error::ModelInconsistency(format!("unknown hypervisor {}", uuid)))
}

fn get_vm(model: &ClusterModel, uuid: Uuid) -> Result<&VirtualMachine> {
    model
        .get_vm(uuid)
        .ok_or_else(|| Error::ModelInconsistency(format!("unknown vm {}", uuid)))
}

fn migration_source(action: &Action) -> String {
    match &action.input_parameters {
        ActionParameters::Migration { src_hypervisor, .. } => src_hypervisor.clone(),
        ActionParameters::ServiceState { .. } => String::new(),
    }
}

fn migration_destination(action: &Action) -> String {
    match &action.input_parameters {
        ActionParameters::Migration { dst_hypervisor, .. } => dst_hypervisor.clone(),
        ActionParameters::ServiceState { .. } => String::new(),
    }
}
