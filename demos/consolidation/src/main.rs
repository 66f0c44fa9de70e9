//! Runs one audit over a small synthetic cluster and applies the emitted
//! plan with an in-memory compute client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;
use uuid::Uuid;

use rebalancer::applier::service::ApplierService;
use rebalancer::applier::ComputeClient;
use rebalancer::core::config::AuditConfig;
use rebalancer::core::metrics::{Aggregation, Meter, MetricsSource};
use rebalancer::core::model::{ClusterModel, Hypervisor, ServiceState};
use rebalancer::core::strategy::strategy_resolver;
use rebalancer::core::vm::VirtualMachine;
use rebalancer::error::{Error, Result};
use rebalancer::management::{ManagementService, PlanPatch};
use rebalancer::plan::PlanRegistry;
use rebalancer::report;

/// Oracle reporting fixed per-VM statistics.
#[derive(Clone, Default)]
struct DemoMetrics {
    cpu_percent: HashMap<Uuid, f64>,
    ram: HashMap<Uuid, f64>,
    disk: HashMap<Uuid, f64>,
}

impl MetricsSource for DemoMetrics {
    fn aggregate(
        &self,
        resource_id: Uuid,
        meter: Meter,
        _period_secs: u64,
        _aggregation: Aggregation,
    ) -> Option<f64> {
        match meter {
            Meter::CpuUtil => self.cpu_percent.get(&resource_id).cloned(),
            Meter::MemoryUsage => self.ram.get(&resource_id).cloned(),
            Meter::DiskRootSize => self.disk.get(&resource_id).cloned(),
            _ => None,
        }
    }
}

/// Compute cloud stub tracking placements and service states.
#[derive(Clone, Default)]
struct DemoCloud {
    inner: Arc<Mutex<DemoCloudState>>,
}

#[derive(Default)]
struct DemoCloudState {
    instances: HashMap<Uuid, String>,
    services: HashMap<Uuid, ServiceState>,
}

impl DemoCloud {
    fn from_model(model: &ClusterModel) -> Self {
        let cloud = Self::default();
        {
            let mut state = cloud.inner.lock().unwrap();
            for hypervisor in model.get_all_hypervisors() {
                state.services.insert(hypervisor.uuid, hypervisor.state);
                for vm in model.mapping().vms_of(hypervisor.uuid) {
                    state.instances.insert(vm, hypervisor.hostname.clone());
                }
            }
        }
        cloud
    }
}

impl ComputeClient for DemoCloud {
    fn host_of_instance(&self, instance: Uuid) -> Result<String> {
        let state = self.inner.lock().unwrap();
        state
            .instances
            .get(&instance)
            .cloned()
            .ok_or(Error::NotFound(instance))
    }

    fn live_migrate(&mut self, instance: Uuid, destination: &str) -> Result<()> {
        info!("cloud: live-migrating {} to {}", instance, destination);
        let mut state = self.inner.lock().unwrap();
        state.instances.insert(instance, destination.to_string());
        Ok(())
    }

    fn service_state(&self, hypervisor: Uuid) -> Result<ServiceState> {
        let state = self.inner.lock().unwrap();
        state
            .services
            .get(&hypervisor)
            .cloned()
            .ok_or(Error::NotFound(hypervisor))
    }

    fn set_service_state(&mut self, hypervisor: Uuid, state: ServiceState) -> Result<()> {
        info!("cloud: setting service {} {}", hypervisor, state);
        let mut inner = self.inner.lock().unwrap();
        inner.services.insert(hypervisor, state);
        Ok(())
    }
}

fn build_cluster() -> (ClusterModel, DemoMetrics) {
    let mut model = ClusterModel::new();
    let mut metrics = DemoMetrics::default();

    let hosts: Vec<Uuid> = (0..4)
        .map(|i| {
            let uuid = Uuid::new_v4();
            model.add_hypervisor(Hypervisor::new(uuid, &format!("node-{}", i), 40, 65536, 2000));
            uuid
        })
        .collect();

    // a lightly loaded fleet spread over all four hosts
    let load = [
        (hosts[0], 10, 10., 1024., 20.),
        (hosts[0], 8, 25., 2048., 40.),
        (hosts[1], 10, 30., 4096., 40.),
        (hosts[2], 4, 20., 1024., 10.),
        (hosts[3], 2, 15., 512., 10.),
    ];
    for (host, vcpus, cpu, ram, disk) in load {
        let uuid = Uuid::new_v4();
        model
            .add_vm(VirtualMachine::new(uuid, vcpus, ram as u64, disk as u64), host)
            .expect("fresh vm cannot be mapped twice");
        metrics.cpu_percent.insert(uuid, cpu);
        metrics.ram.insert(uuid, ram);
        metrics.disk.insert(uuid, disk);
    }

    (model, metrics)
}

fn main() {
    env_logger::init();

    let (model, metrics) = build_cluster();
    let config = AuditConfig::new();
    let strategy = strategy_resolver(&config, Box::new(metrics));

    let solution = strategy.execute(&model).expect("audit failed");
    println!("planned actions (efficacy {:.3}):", solution.efficacy());
    for (position, action) in solution.actions().iter().enumerate() {
        println!("  {}: {} {}", position, action.action_type, action.resource_id);
    }
    report::save_actions_csv(solution.actions(), "plan.csv").expect("cannot save plan.csv");
    report::save_solution_json(&solution, "solution.json").expect("cannot save solution.json");

    let cloud = DemoCloud::from_model(&model);
    let registry = Arc::new(Mutex::new(PlanRegistry::new()));
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &solution)
        .expect("the plan has actions");

    let applier = ApplierService::new(
        registry.clone(),
        Arc::new(Mutex::new(Box::new(cloud.clone()) as Box<dyn ComputeClient>)),
        2,
    );
    let management = ManagementService::new(registry, applier);

    let patch = PlanPatch {
        op: "replace".to_string(),
        path: "/state".to_string(),
        value: "TRIGGERED".to_string(),
    };
    management.patch_plan(plan, &patch).expect("plan can be triggered");
    management.applier().join();

    let record = management.get_plan(plan).expect("plan exists");
    println!("plan {} finished as {}", record.uuid, record.state);
}
