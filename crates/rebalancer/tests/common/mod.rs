#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use rebalancer::applier::ComputeClient;
use rebalancer::core::common::CapacityFactors;
use rebalancer::core::metrics::{Aggregation, Meter, MetricsSource};
use rebalancer::core::model::{ClusterModel, Hypervisor, ServiceState};
use rebalancer::core::solution::{Action, ActionParameters, ActionType, Solution};
use rebalancer::core::strategies::basic_consolidation::BasicConsolidation;
use rebalancer::core::vm::{VirtualMachine, VmState};
use rebalancer::error::{Error, Result};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Metrics oracle backed by plain maps, one per consumed signal.
#[derive(Clone, Default)]
pub struct FakeMetrics {
    vm_cpu_util: HashMap<Uuid, f64>,
    vm_ram_usage: HashMap<Uuid, f64>,
    vm_ram_allocation: HashMap<Uuid, f64>,
    vm_disk_root_size: HashMap<Uuid, f64>,
    node_cpu_percent: HashMap<Uuid, f64>,
    empty_meter: Option<Meter>,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vm(&mut self, vm: Uuid, cpu_percent: f64, ram: f64, disk: f64) {
        self.vm_cpu_util.insert(vm, cpu_percent);
        self.vm_ram_usage.insert(vm, ram);
        self.vm_disk_root_size.insert(vm, disk);
    }

    pub fn set_vm_ram_allocation(&mut self, vm: Uuid, ram: f64) {
        self.vm_ram_allocation.insert(vm, ram);
    }

    pub fn set_node_cpu_percent(&mut self, node: Uuid, percent: f64) {
        self.node_cpu_percent.insert(node, percent);
    }

    pub fn clear_vm_cpu(&mut self, vm: Uuid) {
        self.vm_cpu_util.remove(&vm);
    }

    pub fn clear_vm_ram_usage(&mut self, vm: Uuid) {
        self.vm_ram_usage.remove(&vm);
    }

    /// Makes the oracle report no data for one meter, regardless of the
    /// stored values.
    pub fn empty_one_metric(&mut self, meter: Meter) {
        self.empty_meter = Some(meter);
    }
}

impl MetricsSource for FakeMetrics {
    fn aggregate(
        &self,
        resource_id: Uuid,
        meter: Meter,
        _period_secs: u64,
        _aggregation: Aggregation,
    ) -> Option<f64> {
        if self.empty_meter == Some(meter) {
            return None;
        }
        let values = match meter {
            Meter::CpuUtil => &self.vm_cpu_util,
            Meter::MemoryUsage => &self.vm_ram_usage,
            Meter::Memory => &self.vm_ram_allocation,
            Meter::DiskRootSize => &self.vm_disk_root_size,
            Meter::ComputeNodeCpuPercent => &self.node_cpu_percent,
        };
        values.get(&resource_id).cloned()
    }
}

/// A cluster model under construction together with its fake metrics.
pub struct TestCluster {
    pub model: ClusterModel,
    pub metrics: FakeMetrics,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            model: ClusterModel::new(),
            metrics: FakeMetrics::new(),
        }
    }

    pub fn add_node(&mut self, hostname: &str, cpu_cores: u32, memory: u64, disk: u64) -> Uuid {
        let uuid = Uuid::new_v4();
        self.model
            .add_hypervisor(Hypervisor::new(uuid, hostname, cpu_cores, memory, disk));
        uuid
    }

    pub fn add_offline_node(&mut self, hostname: &str, cpu_cores: u32, memory: u64, disk: u64) -> Uuid {
        let uuid = Uuid::new_v4();
        self.model.add_hypervisor(
            Hypervisor::new(uuid, hostname, cpu_cores, memory, disk).with_state(ServiceState::Down),
        );
        uuid
    }

    /// Adds an active VM with the given declared vCPUs and measured
    /// consumption.
    pub fn add_vm(&mut self, node: Uuid, vcpus: u32, cpu_percent: f64, ram: f64, disk: f64) -> Uuid {
        self.add_vm_in_state(node, vcpus, cpu_percent, ram, disk, VmState::Active)
    }

    pub fn add_vm_in_state(
        &mut self,
        node: Uuid,
        vcpus: u32,
        cpu_percent: f64,
        ram: f64,
        disk: f64,
        state: VmState,
    ) -> Uuid {
        let uuid = Uuid::new_v4();
        self.model
            .add_vm(
                VirtualMachine::new(uuid, vcpus, ram.ceil() as u64, disk.ceil() as u64)
                    .with_state(state),
                node,
            )
            .unwrap();
        self.metrics.set_vm(uuid, cpu_percent, ram, disk);
        uuid
    }

    pub fn strategy(&self, factors: CapacityFactors) -> BasicConsolidation {
        BasicConsolidation::new(Box::new(self.metrics.clone()), factors)
    }

    pub fn hostname(&self, node: Uuid) -> String {
        self.model.get_hypervisor(node).unwrap().hostname.clone()
    }
}

/// Migrations of a solution as (vm, src, dst) triples in emission order.
pub fn migrations_of(solution: &Solution) -> Vec<(Uuid, String, String)> {
    solution
        .actions()
        .iter()
        .filter_map(|action| match &action.input_parameters {
            ActionParameters::Migration {
                src_hypervisor,
                dst_hypervisor,
                ..
            } => Some((
                action.resource_id,
                src_hypervisor.clone(),
                dst_hypervisor.clone(),
            )),
            _ => None,
        })
        .collect()
}

/// Service-state changes of a solution as (hypervisor, state) pairs.
pub fn state_changes_of(solution: &Solution) -> Vec<(Uuid, ServiceState)> {
    solution
        .actions()
        .iter()
        .filter_map(|action| match &action.input_parameters {
            ActionParameters::ServiceState { state } => Some((action.resource_id, *state)),
            _ => None,
        })
        .collect()
}

/// Checks the planner output invariants that must hold on every input:
/// the post-plan model realizes every emitted migration, no VM migrates
/// twice, hosts stay within their scaled capacities, emptied hosts are
/// powered down exactly once, and reactivations precede the migrations
/// into their hosts.
pub fn assert_solution_invariants(
    cluster: &TestCluster,
    solution: &Solution,
    factors: CapacityFactors,
) {
    let model = solution.model();
    let strategy = cluster.strategy(factors);
    let accountant = strategy.accountant();

    let mut migrated: HashSet<Uuid> = HashSet::new();
    for (vm, _src, dst) in migrations_of(solution) {
        assert!(migrated.insert(vm), "vm {} migrates more than once", vm);
        let host = model.mapping().host_of(vm).unwrap();
        assert_eq!(
            model.get_hypervisor(host).unwrap().hostname,
            dst,
            "post-plan model does not realize the migration of vm {}",
            vm
        );
    }

    for hypervisor in model.get_all_hypervisors() {
        let utilization = accountant.hypervisor_utilization(model, hypervisor).unwrap();
        let capacity = accountant.hypervisor_capacity(hypervisor);
        if !model.mapping().vms_of(hypervisor.uuid).is_empty() {
            assert!(
                utilization.cpu <= capacity.cpu * factors.cpu + 1e-9,
                "host {} exceeds its cpu budget",
                hypervisor.hostname
            );
            assert!(utilization.ram <= capacity.ram * factors.ram + 1e-9);
            assert!(utilization.disk <= capacity.disk * factors.disk + 1e-9);
        } else {
            assert_eq!(
                hypervisor.state,
                ServiceState::Down,
                "empty host {} was not powered down",
                hypervisor.hostname
            );
        }
    }

    for hypervisor in model.get_all_hypervisors() {
        if model.mapping().vms_of(hypervisor.uuid).is_empty() {
            let downs = state_changes_of(solution)
                .iter()
                .filter(|(uuid, state)| *uuid == hypervisor.uuid && *state == ServiceState::Down)
                .count();
            let was_up = cluster.model.get_hypervisor(hypervisor.uuid).unwrap().state
                == ServiceState::Up;
            if was_up {
                assert_eq!(downs, 1, "host {} needs exactly one power-down", hypervisor.hostname);
            }
        }
    }

    // a reactivation must precede every migration into its host
    for (i, action) in solution.actions().iter().enumerate() {
        if action.action_type != ActionType::Migrate {
            continue;
        }
        if let ActionParameters::Migration { dst_hypervisor, .. } = &action.input_parameters {
            let dst = cluster
                .model
                .get_all_hypervisors()
                .into_iter()
                .find(|h| h.hostname == *dst_hypervisor)
                .unwrap();
            if dst.state == ServiceState::Down {
                let upped = solution.actions()[..i].iter().any(|a| {
                    a.resource_id == dst.uuid
                        && a.input_parameters
                            == ActionParameters::ServiceState {
                                state: ServiceState::Up,
                            }
                });
                assert!(
                    upped,
                    "migration into offline host {} without a preceding power-up",
                    dst.hostname
                );
            }
        }
    }
}

pub fn assert_close(left: f64, right: f64) {
    assert!(
        (left - right).abs() < 1e-9,
        "expected {} to equal {}",
        left,
        right
    );
}

/// In-memory compute cloud with shared state, so that tests keep a handle
/// while the applier owns a clone.
#[derive(Clone, Default)]
pub struct InMemoryCompute {
    inner: Arc<Mutex<ComputeState>>,
}

#[derive(Default)]
pub struct ComputeState {
    pub instances: HashMap<Uuid, String>,
    pub services: HashMap<Uuid, ServiceState>,
    pub fail_migrations_of: HashSet<Uuid>,
    pub migration_calls: usize,
    pub service_state_calls: usize,
}

impl InMemoryCompute {
    pub fn from_model(model: &ClusterModel) -> Self {
        let client = Self::default();
        {
            let mut state = client.state();
            for hypervisor in model.get_all_hypervisors() {
                state.services.insert(hypervisor.uuid, hypervisor.state);
                for vm in model.mapping().vms_of(hypervisor.uuid) {
                    state.instances.insert(vm, hypervisor.hostname.clone());
                }
            }
        }
        client
    }

    pub fn state(&self) -> MutexGuard<ComputeState> {
        self.inner.lock().unwrap()
    }

    pub fn fail_migrations_of(&self, instance: Uuid) {
        self.state().fail_migrations_of.insert(instance);
    }
}

impl ComputeClient for InMemoryCompute {
    fn host_of_instance(&self, instance: Uuid) -> Result<String> {
        self.state()
            .instances
            .get(&instance)
            .cloned()
            .ok_or(Error::NotFound(instance))
    }

    fn live_migrate(&mut self, instance: Uuid, destination: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_migrations_of.contains(&instance) {
            return Err(Error::Action(format!(
                "live migration of {} timed out",
                instance
            )));
        }
        if !state.instances.contains_key(&instance) {
            return Err(Error::NotFound(instance));
        }
        state.migration_calls += 1;
        state.instances.insert(instance, destination.to_string());
        Ok(())
    }

    fn service_state(&self, hypervisor: Uuid) -> Result<ServiceState> {
        self.state()
            .services
            .get(&hypervisor)
            .cloned()
            .ok_or(Error::NotFound(hypervisor))
    }

    fn set_service_state(&mut self, hypervisor: Uuid, state: ServiceState) -> Result<()> {
        let mut inner = self.state();
        if !inner.services.contains_key(&hypervisor) {
            return Err(Error::NotFound(hypervisor));
        }
        inner.service_state_calls += 1;
        inner.services.insert(hypervisor, state);
        Ok(())
    }
}

/// A minimal non-empty solution for plan lifecycle tests.
pub fn service_state_solution(hypervisor: Uuid) -> Solution {
    let mut solution = Solution::new(ClusterModel::new());
    solution.add_action(Action::change_service_state(hypervisor, ServiceState::Down));
    solution
}
