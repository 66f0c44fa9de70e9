//! Optimization solution: the ordered action sequence, the post-planning
//! model and the efficacy score.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::core::model::{ClusterModel, ServiceState};

/// Migration type carried by emitted migration actions. The planner only
/// produces live migrations.
pub const LIVE_MIGRATION: &str = "live";

/// Kinds of remediation actions the planner emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ActionType {
    #[strum(serialize = "migrate")]
    #[serde(rename = "migrate")]
    Migrate,
    #[strum(serialize = "change_nova_service_state")]
    #[serde(rename = "change_nova_service_state")]
    ChangeNovaServiceState,
}

/// Typed input parameters per action kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionParameters {
    Migration {
        migration_type: String,
        src_hypervisor: String,
        dst_hypervisor: String,
    },
    ServiceState {
        state: ServiceState,
    },
}

/// Immutable record of a single remediation step. `resource_id` identifies
/// the subject: the VM for migrations, the hypervisor for service-state
/// changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub resource_id: Uuid,
    pub input_parameters: ActionParameters,
}

impl Action {
    pub fn live_migration(vm: Uuid, src_hypervisor: &str, dst_hypervisor: &str) -> Self {
        Self {
            action_type: ActionType::Migrate,
            resource_id: vm,
            input_parameters: ActionParameters::Migration {
                migration_type: LIVE_MIGRATION.to_string(),
                src_hypervisor: src_hypervisor.to_string(),
                dst_hypervisor: dst_hypervisor.to_string(),
            },
        }
    }

    pub fn change_service_state(hypervisor: Uuid, state: ServiceState) -> Self {
        Self {
            action_type: ActionType::ChangeNovaServiceState,
            resource_id: hypervisor,
            input_parameters: ActionParameters::ServiceState { state },
        }
    }
}

/// Ordered action sequence accumulated by a strategy, together with the
/// speculative model reflecting the post-planning placement and the
/// efficacy score (cluster-relative CPU utilization after planning).
#[derive(Clone, Debug, Serialize)]
pub struct Solution {
    actions: Vec<Action>,
    model: ClusterModel,
    efficacy: f64,
    migrations: usize,
}

impl Solution {
    /// Starts an empty solution over a speculative model.
    pub fn new(model: ClusterModel) -> Self {
        Self {
            actions: Vec::new(),
            model,
            efficacy: 0.,
            migrations: 0,
        }
    }

    pub fn add_action(&mut self, action: Action) {
        if action.action_type == ActionType::Migrate {
            self.migrations += 1;
        }
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Replaces the action sequence, keeping the migration counter in sync.
    /// Used by solution post-processing; removals must be order-stable.
    pub fn replace_actions(&mut self, actions: Vec<Action>) {
        self.migrations = actions
            .iter()
            .filter(|a| a.action_type == ActionType::Migrate)
            .count();
        self.actions = actions;
    }

    pub fn model(&self) -> &ClusterModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut ClusterModel {
        &mut self.model
    }

    /// Number of migrations currently in the sequence.
    pub fn migration_count(&self) -> usize {
        self.migrations
    }

    pub fn efficacy(&self) -> f64 {
        self.efficacy
    }

    pub fn set_efficacy(&mut self, efficacy: f64) {
        self.efficacy = efficacy;
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
