//! Action plan lifecycle: the persisted plan record, its state machine and
//! an in-memory registry implementing the persistence contract.

use chrono::{DateTime, Utc};
use indexmap::map::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::core::solution::{Action, Solution};
use crate::error::{Error, Result};

/// Lifecycle state of an action plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    Recommended,
    Triggered,
    Ongoing,
    Succeeded,
    Failed,
    Cancelled,
    Deleted,
}

impl PlanState {
    /// Terminal with respect to execution. `Deleted` is terminal for the
    /// whole record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanState::Succeeded | PlanState::Failed | PlanState::Cancelled | PlanState::Deleted
        )
    }
}

/// Execution state of a single action within a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Ongoing,
    Succeeded,
    Failed,
}

/// Who requests a plan state transition. The management surface and the
/// applier are allowed different transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionSource {
    Management,
    Applier,
}

/// The admissible transitions of the plan state machine.
pub fn transition_allowed(from: PlanState, to: PlanState, source: TransitionSource) -> bool {
    use PlanState::*;
    match source {
        TransitionSource::Management => matches!(
            (from, to),
            (Recommended, Triggered) | (Recommended, Cancelled) | (Triggered, Cancelled) | (Ongoing, Cancelled)
        ),
        TransitionSource::Applier => matches!(
            (from, to),
            (Triggered, Ongoing) | (Ongoing, Succeeded) | (Ongoing, Failed)
        ),
    }
}

/// An action embedded in a persisted plan, with its position in the
/// emission order and its execution state.
#[derive(Clone, Debug, Serialize)]
pub struct StoredAction {
    pub uuid: Uuid,
    pub position: usize,
    pub state: ActionState,
    pub action: Action,
}

/// Persisted lifecycle wrapper of a solution.
#[derive(Clone, Debug, Serialize)]
pub struct ActionPlan {
    pub uuid: Uuid,
    pub audit_uuid: Uuid,
    pub first_action_id: Uuid,
    pub state: PlanState,
    pub global_efficacy: f64,
    pub actions: Vec<StoredAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Pagination and ordering over plan listings.
#[derive(Clone, Debug, Default)]
pub struct PageRequest {
    pub marker: Option<Uuid>,
    pub limit: Option<usize>,
    pub sort_key: Option<SortKey>,
    pub sort_dir: Option<SortDir>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortKey {
    Uuid,
    State,
    CreatedAt,
    UpdatedAt,
    AuditUuid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

/// In-memory stand-in for the persistent plan store.
///
/// State-field updates go through the transition validator; the registry is
/// wrapped in a mutex by its owners, which serializes per-plan state writes.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    plans: IndexMap<Uuid, ActionPlan>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a solution as a new plan in `Recommended` state. A solution
    /// with no actions cannot become a plan.
    pub fn create_plan(&mut self, audit_uuid: Uuid, solution: &Solution) -> Result<Uuid> {
        if solution.is_empty() {
            return Err(Error::Schema(
                "an action plan requires a non-empty action chain".to_string(),
            ));
        }
        let actions: Vec<StoredAction> = solution
            .actions()
            .iter()
            .enumerate()
            .map(|(position, action)| StoredAction {
                uuid: Uuid::new_v4(),
                position,
                state: ActionState::Pending,
                action: action.clone(),
            })
            .collect();
        let now = Utc::now();
        let plan = ActionPlan {
            uuid: Uuid::new_v4(),
            audit_uuid,
            first_action_id: actions[0].uuid,
            state: PlanState::Recommended,
            global_efficacy: solution.efficacy(),
            actions,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let uuid = plan.uuid;
        self.plans.insert(uuid, plan);
        Ok(uuid)
    }

    /// Fetches a plan. Soft-deleted plans are not found.
    pub fn get(&self, uuid: Uuid) -> Result<&ActionPlan> {
        match self.plans.get(&uuid) {
            Some(plan) if plan.state != PlanState::Deleted => Ok(plan),
            _ => Err(Error::NotFound(uuid)),
        }
    }

    /// Lists plans with pagination. Soft-deleted plans are excluded.
    ///
    /// Sorting by `audit_uuid` is applied in memory after the fetch; the
    /// remaining keys are handled at store level. Both paths share the
    /// implementation here, but the marker cut happens after ordering in
    /// both cases, matching the external store contract.
    pub fn list(&self, page: &PageRequest) -> Vec<&ActionPlan> {
        let mut rows: Vec<&ActionPlan> = self
            .plans
            .values()
            .filter(|plan| plan.state != PlanState::Deleted)
            .collect();

        let key = page.sort_key.unwrap_or(SortKey::CreatedAt);
        rows.sort_by(|a, b| match key {
            SortKey::Uuid => a.uuid.cmp(&b.uuid),
            SortKey::State => a.state.to_string().cmp(&b.state.to_string()),
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::AuditUuid => a.audit_uuid.cmp(&b.audit_uuid),
        });
        if page.sort_dir == Some(SortDir::Desc) {
            rows.reverse();
        }

        let start = match page.marker {
            Some(marker) => match rows.iter().position(|plan| plan.uuid == marker) {
                Some(position) => position + 1,
                None => return Vec::new(),
            },
            None => 0,
        };
        let mut rows: Vec<&ActionPlan> = rows.into_iter().skip(start).collect();
        if let Some(limit) = page.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Applies a validated state transition. Rejected transitions leave the
    /// record untouched.
    pub fn patch_state(
        &mut self,
        uuid: Uuid,
        target: PlanState,
        source: TransitionSource,
    ) -> Result<PlanState> {
        let current = self.get(uuid)?.state;
        if !transition_allowed(current, target, source) {
            return Err(Error::IllegalTransition {
                from: current,
                to: target,
            });
        }
        let plan = self.plans.get_mut(&uuid).ok_or(Error::NotFound(uuid))?;
        plan.state = target;
        plan.updated_at = Utc::now();
        Ok(target)
    }

    /// Updates the execution state of a single action within a plan.
    pub fn set_action_state(&mut self, plan: Uuid, action: Uuid, state: ActionState) -> Result<()> {
        self.get(plan)?;
        let record = self.plans.get_mut(&plan).ok_or(Error::NotFound(plan))?;
        match record.actions.iter_mut().find(|a| a.uuid == action) {
            Some(stored) => {
                stored.state = state;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(Error::NotFound(action)),
        }
    }

    /// Soft-deletes a plan: the record is retained for audit but excluded
    /// from reads and listings.
    pub fn soft_delete(&mut self, uuid: Uuid) -> Result<()> {
        self.get(uuid)?;
        let plan = self.plans.get_mut(&uuid).ok_or(Error::NotFound(uuid))?;
        let now = Utc::now();
        plan.state = PlanState::Deleted;
        plan.deleted_at = Some(now);
        plan.updated_at = now;
        Ok(())
    }
}
