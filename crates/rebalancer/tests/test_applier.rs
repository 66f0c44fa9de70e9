mod common;

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use rebalancer::applier::engine::WorkflowEngine;
use rebalancer::applier::service::ApplierService;
use rebalancer::applier::{build_action, ComputeClient};
use rebalancer::core::common::CapacityFactors;
use rebalancer::core::model::{ClusterModel, Hypervisor, ServiceState};
use rebalancer::core::solution::{Action, ActionParameters, ActionType, Solution};
use rebalancer::core::vm::VirtualMachine;
use rebalancer::core::strategy::Strategy;
use rebalancer::error::Error;
use rebalancer::management::{ManagementService, PlanPatch};
use rebalancer::plan::{ActionState, PlanRegistry, PlanState, TransitionSource};

use common::{init_logging, InMemoryCompute, TestCluster};

fn shared(client: &InMemoryCompute) -> Arc<Mutex<Box<dyn ComputeClient>>> {
    Arc::new(Mutex::new(Box::new(client.clone()) as Box<dyn ComputeClient>))
}

fn management_over(client: &InMemoryCompute) -> (Arc<Mutex<PlanRegistry>>, ManagementService) {
    let registry = Arc::new(Mutex::new(PlanRegistry::new()));
    let applier = ApplierService::new(registry.clone(), shared(client), 2);
    (registry.clone(), ManagementService::new(registry, applier))
}

#[test]
// Reverting an executed migration puts the instance back on its source.
fn test_migrate_execute_then_revert_round_trip() {
    let mut cluster = TestCluster::new();
    let node_0 = cluster.add_node("node-0", 40, 64, 250);
    cluster.add_node("node-1", 40, 64, 250);
    let vm = cluster.add_vm(node_0, 10, 10., 1., 10.);

    let mut client = InMemoryCompute::from_model(&cluster.model);
    let action = build_action(&Action::live_migration(vm, "node-0", "node-1")).unwrap();

    action.execute(&mut client).unwrap();
    assert_eq!(client.host_of_instance(vm).unwrap(), "node-1");
    action.postcondition(&client).unwrap();

    action.revert(&mut client).unwrap();
    assert_eq!(client.host_of_instance(vm).unwrap(), "node-0");
}

#[test]
// Re-executing a migration whose instance already sits on the destination
// is a no-op success.
fn test_migrate_is_idempotent() {
    let mut cluster = TestCluster::new();
    cluster.add_node("node-0", 40, 64, 250);
    let node_1 = cluster.add_node("node-1", 40, 64, 250);
    let vm = cluster.add_vm(node_1, 10, 10., 1., 10.);

    let mut client = InMemoryCompute::from_model(&cluster.model);
    let action = build_action(&Action::live_migration(vm, "node-0", "node-1")).unwrap();
    action.execute(&mut client).unwrap();
    assert_eq!(client.state().migration_calls, 0);
}

#[test]
// Re-asserting a service state that already holds does not call out.
fn test_service_state_change_is_idempotent() {
    let mut cluster = TestCluster::new();
    let node_0 = cluster.add_node("node-0", 40, 64, 250);

    let mut client = InMemoryCompute::from_model(&cluster.model);
    let action =
        build_action(&Action::change_service_state(node_0, ServiceState::Up)).unwrap();
    action.execute(&mut client).unwrap();
    assert_eq!(client.state().service_state_calls, 0);

    let action =
        build_action(&Action::change_service_state(node_0, ServiceState::Down)).unwrap();
    action.execute(&mut client).unwrap();
    assert_eq!(client.state().service_state_calls, 1);
    assert_eq!(
        client.service_state(node_0).unwrap(),
        ServiceState::Down
    );
}

#[test]
// Only live migrations pass schema validation.
fn test_non_live_migration_is_rejected() {
    let record = Action {
        action_type: ActionType::Migrate,
        resource_id: Uuid::new_v4(),
        input_parameters: ActionParameters::Migration {
            migration_type: "cold".to_string(),
            src_hypervisor: "node-0".to_string(),
            dst_hypervisor: "node-1".to_string(),
        },
    };
    assert!(matches!(build_action(&record), Err(Error::Schema(_))));
}

#[test]
// Hypervisor identifiers must be non-empty and the subject must be a
// well-formed uuid.
fn test_malformed_migration_parameters_are_rejected() {
    let record = Action {
        action_type: ActionType::Migrate,
        resource_id: Uuid::new_v4(),
        input_parameters: ActionParameters::Migration {
            migration_type: "live".to_string(),
            src_hypervisor: String::new(),
            dst_hypervisor: "node-1".to_string(),
        },
    };
    assert!(matches!(build_action(&record), Err(Error::Schema(_))));

    let record = Action::live_migration(Uuid::nil(), "node-0", "node-1");
    assert!(matches!(build_action(&record), Err(Error::Schema(_))));
}

#[test]
// Parameters must match the action type.
fn test_mismatched_parameters_are_rejected() {
    let record = Action {
        action_type: ActionType::Migrate,
        resource_id: Uuid::new_v4(),
        input_parameters: ActionParameters::ServiceState {
            state: ServiceState::Down,
        },
    };
    assert!(matches!(build_action(&record), Err(Error::Schema(_))));
}

#[test]
// A triggered plan runs to SUCCEEDED through the management surface and
// the compute cloud ends up in the planned placement.
fn test_plan_executes_to_succeeded() {
    init_logging();
    let mut cluster = TestCluster::new();
    let node_0 = cluster.add_node("node-0", 40, 64, 250);
    let node_1 = cluster.add_node("node-1", 40, 64, 250);
    let vm_0 = cluster.add_vm(node_0, 10, 10., 1., 10.);
    cluster.add_vm(node_1, 10, 30., 2., 15.);

    let strategy = cluster.strategy(CapacityFactors::default());
    let solution = strategy.execute(&cluster.model).unwrap();

    let client = InMemoryCompute::from_model(&cluster.model);
    let (registry, management) = management_over(&client);
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &solution)
        .unwrap();

    let patch = PlanPatch {
        op: "replace".to_string(),
        path: "/state".to_string(),
        value: "TRIGGERED".to_string(),
    };
    assert_eq!(management.patch_plan(plan, &patch).unwrap(), PlanState::Triggered);
    management.applier().join();

    let record = management.get_plan(plan).unwrap();
    assert_eq!(record.state, PlanState::Succeeded);
    assert!(record
        .actions
        .iter()
        .all(|a| a.state == ActionState::Succeeded));
    assert_eq!(client.host_of_instance(vm_0).unwrap(), "node-1");
    assert_eq!(client.service_state(node_0).unwrap(), ServiceState::Down);
}

#[test]
// A failing action triggers the best-effort revert of the completed ones
// and the plan finishes FAILED.
fn test_failed_action_reverts_completed_actions() {
    init_logging();
    let mut model = ClusterModel::new();
    let h0 = Uuid::new_v4();
    let h1 = Uuid::new_v4();
    model.add_hypervisor(Hypervisor::new(h0, "node-0", 40, 64, 250));
    model.add_hypervisor(Hypervisor::new(h1, "node-1", 40, 64, 250));
    let vm_a = Uuid::new_v4();
    let vm_b = Uuid::new_v4();
    model.add_vm(VirtualMachine::new(vm_a, 2, 2, 10), h0).unwrap();
    model.add_vm(VirtualMachine::new(vm_b, 2, 2, 10), h0).unwrap();

    let mut solution = Solution::new(model.clone());
    solution.add_action(Action::live_migration(vm_a, "node-0", "node-1"));
    solution.add_action(Action::live_migration(vm_b, "node-0", "node-1"));

    let client = InMemoryCompute::from_model(&model);
    client.fail_migrations_of(vm_b);

    let registry = Arc::new(Mutex::new(PlanRegistry::new()));
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &solution)
        .unwrap();
    registry
        .lock()
        .unwrap()
        .patch_state(plan, PlanState::Triggered, TransitionSource::Management)
        .unwrap();

    let engine = WorkflowEngine::new(registry.clone(), shared(&client));
    assert_eq!(engine.run_plan(plan).unwrap(), PlanState::Failed);

    let registry = registry.lock().unwrap();
    let record = registry.get(plan).unwrap();
    assert_eq!(record.state, PlanState::Failed);
    assert_eq!(record.actions[1].state, ActionState::Failed);
    // the completed first migration was rolled back
    assert_eq!(client.host_of_instance(vm_a).unwrap(), "node-0");
    assert_eq!(client.host_of_instance(vm_b).unwrap(), "node-0");
}

#[test]
// A plan cancelled after acceptance never dispatches an action and stays
// CANCELLED.
fn test_cancelled_plan_dispatches_nothing() {
    init_logging();
    let mut cluster = TestCluster::new();
    let node_0 = cluster.add_node("node-0", 40, 64, 250);
    cluster.add_node("node-1", 40, 64, 250);
    let vm = cluster.add_vm(node_0, 10, 10., 1., 10.);

    let mut solution = Solution::new(cluster.model.clone());
    solution.add_action(Action::live_migration(vm, "node-0", "node-1"));

    let client = InMemoryCompute::from_model(&cluster.model);
    let registry = Arc::new(Mutex::new(PlanRegistry::new()));
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &solution)
        .unwrap();
    {
        let mut registry = registry.lock().unwrap();
        registry
            .patch_state(plan, PlanState::Triggered, TransitionSource::Management)
            .unwrap();
        registry
            .patch_state(plan, PlanState::Cancelled, TransitionSource::Management)
            .unwrap();
    }

    let engine = WorkflowEngine::new(registry.clone(), shared(&client));
    assert_eq!(engine.run_plan(plan).unwrap(), PlanState::Cancelled);
    assert_eq!(client.state().migration_calls, 0);
    assert_eq!(
        registry.lock().unwrap().get(plan).unwrap().state,
        PlanState::Cancelled
    );
}

#[test]
// Patches to anything but /state are rejected without touching the plan.
fn test_patch_path_other_than_state_is_rejected() {
    let client = InMemoryCompute::default();
    let (registry, management) = management_over(&client);
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &common::service_state_solution(Uuid::new_v4()))
        .unwrap();

    let patch = PlanPatch {
        op: "replace".to_string(),
        path: "/audit_uuid".to_string(),
        value: Uuid::new_v4().to_string(),
    };
    assert!(matches!(
        management.patch_plan(plan, &patch),
        Err(Error::Schema(_))
    ));
    assert_eq!(
        management.get_plan(plan).unwrap().state,
        PlanState::Recommended
    );
}

#[test]
// A patch document arriving as JSON parses into the typed patch.
fn test_patch_document_parses_from_json() {
    let patch: PlanPatch =
        serde_json::from_str(r#"{"op": "replace", "path": "/state", "value": "CANCELLED"}"#)
            .unwrap();
    assert_eq!(patch.value.parse::<PlanState>().unwrap(), PlanState::Cancelled);

    let client = InMemoryCompute::default();
    let (registry, management) = management_over(&client);
    let plan = registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &common::service_state_solution(Uuid::new_v4()))
        .unwrap();
    assert_eq!(management.patch_plan(plan, &patch).unwrap(), PlanState::Cancelled);
}

#[test]
// Unknown plans are NotFound at the management surface.
fn test_unknown_plan_is_not_found() {
    let client = InMemoryCompute::default();
    let (registry, management) = management_over(&client);
    let unknown = Uuid::new_v4();
    assert_eq!(management.get_plan(unknown).err(), Some(Error::NotFound(unknown)));
    assert!(management.list_plans(&Default::default()).is_empty());

    registry
        .lock()
        .unwrap()
        .create_plan(Uuid::new_v4(), &common::service_state_solution(Uuid::new_v4()))
        .unwrap();
    assert_eq!(management.list_plans(&Default::default()).len(), 1);
}
