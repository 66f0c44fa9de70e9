//! Management surface over persisted action plans.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use uuid::Uuid;

use crate::applier::service::ApplierService;
use crate::error::{Error, Result};
use crate::plan::{ActionPlan, PageRequest, PlanRegistry, PlanState, TransitionSource};

/// A JSON-patch-shaped document. Only a `replace` of `/state` is
/// semantically acted upon.
#[derive(Clone, Debug, Deserialize)]
pub struct PlanPatch {
    pub op: String,
    pub path: String,
    pub value: String,
}

/// Facade implementing the plan management contract: list, get, patch and
/// soft-delete, with state patches validated against the plan state machine.
/// Errors never modify persisted state.
pub struct ManagementService {
    registry: Arc<Mutex<PlanRegistry>>,
    applier: ApplierService,
}

impl ManagementService {
    pub fn new(registry: Arc<Mutex<PlanRegistry>>, applier: ApplierService) -> Self {
        Self { registry, applier }
    }

    pub fn list_plans(&self, page: &PageRequest) -> Vec<ActionPlan> {
        let registry = self.registry.lock().unwrap();
        registry.list(page).into_iter().cloned().collect()
    }

    pub fn get_plan(&self, uuid: Uuid) -> Result<ActionPlan> {
        let registry = self.registry.lock().unwrap();
        registry.get(uuid).cloned()
    }

    /// Applies a patch document. An accepted transition to `Triggered`
    /// dispatches the plan to the applier, fire-and-forget.
    pub fn patch_plan(&self, uuid: Uuid, patch: &PlanPatch) -> Result<PlanState> {
        if patch.path != "/state" {
            return Err(Error::Schema(format!(
                "unsupported patch path {}",
                patch.path
            )));
        }
        if patch.op != "replace" {
            return Err(Error::Schema(format!("unsupported patch op {}", patch.op)));
        }
        let target: PlanState = patch
            .value
            .parse()
            .map_err(|_| Error::Schema(format!("invalid state: {}", patch.value)))?;

        let state = {
            let mut registry = self.registry.lock().unwrap();
            registry.patch_state(uuid, target, TransitionSource::Management)?
        };
        if state == PlanState::Triggered {
            self.applier.launch_action_plan(uuid);
        }
        Ok(state)
    }

    pub fn delete_plan(&self, uuid: Uuid) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        registry.soft_delete(uuid)
    }

    pub fn applier(&self) -> &ApplierService {
        &self.applier
    }
}
