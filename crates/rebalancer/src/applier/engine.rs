//! Serial per-plan workflow engine.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use uuid::Uuid;

use crate::applier::{build_action, ApplierAction, ComputeClient};
use crate::error::{Error, Result};
use crate::plan::{ActionState, PlanRegistry, PlanState, StoredAction, TransitionSource};

/// Executes the actions of one plan strictly in emission order.
///
/// Ordering is semantically required: each action assumes the placement
/// produced by the previous ones. On failure the engine reverts the
/// completed actions in reverse order (best-effort) and reports the plan
/// as failed. A cancellation requested while the plan is ongoing stops the
/// dispatch of not-yet-started actions; the in-flight action runs to
/// completion and the plan stays cancelled regardless of its outcome.
pub struct WorkflowEngine {
    registry: Arc<Mutex<PlanRegistry>>,
    client: Arc<Mutex<Box<dyn ComputeClient>>>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<Mutex<PlanRegistry>>, client: Arc<Mutex<Box<dyn ComputeClient>>>) -> Self {
        Self { registry, client }
    }

    pub fn run_plan(&self, plan: Uuid) -> Result<PlanState> {
        let actions: Vec<StoredAction> = {
            let registry = self.registry.lock().unwrap();
            registry.get(plan)?.actions.clone()
        };

        // the first action starting moves the plan to ONGOING; a plan
        // cancelled between acceptance and execution never starts
        {
            let mut registry = self.registry.lock().unwrap();
            if let Err(e) = registry.patch_state(plan, PlanState::Ongoing, TransitionSource::Applier) {
                let state = registry.get(plan)?.state;
                if state == PlanState::Cancelled {
                    info!("plan {} was cancelled before execution started", plan);
                    return Ok(PlanState::Cancelled);
                }
                return Err(e);
            }
        }

        let mut completed: Vec<(Uuid, Box<dyn ApplierAction>)> = Vec::new();
        for stored in actions {
            // stop dispatching once a cancellation is observed
            if self.plan_state(plan)? == PlanState::Cancelled {
                info!("plan {} cancelled before action {}", plan, stored.position);
                return Ok(PlanState::Cancelled);
            }

            let result = self.run_action(plan, &stored, &mut completed);
            if let Err(e) = result {
                warn!("action {} of plan {} failed: {}", stored.position, plan, e);
                self.revert_completed(&mut completed);
                return self.finish(plan, PlanState::Failed);
            }
        }

        self.finish(plan, PlanState::Succeeded)
    }

    fn run_action(
        &self,
        plan: Uuid,
        stored: &StoredAction,
        completed: &mut Vec<(Uuid, Box<dyn ApplierAction>)>,
    ) -> Result<()> {
        let action = match build_action(&stored.action) {
            Ok(action) => action,
            Err(e) => {
                self.notify(plan, stored.uuid, ActionState::Failed);
                return Err(e);
            }
        };

        self.notify(plan, stored.uuid, ActionState::Ongoing);
        let result = {
            let mut client = self.client.lock().unwrap();
            action
                .precondition(&**client)
                .and_then(|_| action.execute(&mut **client))
        };
        match result {
            Ok(()) => {
                // postconditions are best-effort verification
                let client = self.client.lock().unwrap();
                if let Err(e) = action.postcondition(&**client) {
                    warn!("postcondition of action {} not met: {}", stored.position, e);
                }
                drop(client);
                self.notify(plan, stored.uuid, ActionState::Succeeded);
                completed.push((stored.uuid, action));
                Ok(())
            }
            Err(e) => {
                self.notify(plan, stored.uuid, ActionState::Failed);
                Err(e)
            }
        }
    }

    /// Best-effort revert of completed actions, in reverse order.
    fn revert_completed(&self, completed: &mut Vec<(Uuid, Box<dyn ApplierAction>)>) {
        while let Some((uuid, action)) = completed.pop() {
            let mut client = self.client.lock().unwrap();
            if let Err(e) = action.revert(&mut **client) {
                warn!("failed to revert action {}: {}", uuid, e);
            }
        }
    }

    fn plan_state(&self, plan: Uuid) -> Result<PlanState> {
        let registry = self.registry.lock().unwrap();
        Ok(registry.get(plan)?.state)
    }

    fn finish(&self, plan: Uuid, state: PlanState) -> Result<PlanState> {
        let mut registry = self.registry.lock().unwrap();
        match registry.patch_state(plan, state, TransitionSource::Applier) {
            Ok(state) => Ok(state),
            // a cancellation raced the last action: the plan stays cancelled
            Err(Error::IllegalTransition { from: PlanState::Cancelled, .. }) => {
                Ok(PlanState::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists the per-action execution state. The progress feed of the
    /// management surface reads these records.
    fn notify(&self, plan: Uuid, action: Uuid, state: ActionState) {
        let mut registry = self.registry.lock().unwrap();
        if let Err(e) = registry.set_action_state(plan, action, state) {
            warn!("cannot record state {} of action {}: {}", state, action, e);
        }
    }
}
