//! Applier service accepting plans for execution.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use threadpool::ThreadPool;
use uuid::Uuid;

use crate::applier::engine::WorkflowEngine;
use crate::applier::ComputeClient;
use crate::plan::PlanRegistry;

/// Dispatches accepted plans onto a worker pool.
///
/// Plans over disjoint VM sets may execute in parallel; each plan runs
/// strictly serially inside one worker.
pub struct ApplierService {
    registry: Arc<Mutex<PlanRegistry>>,
    client: Arc<Mutex<Box<dyn ComputeClient>>>,
    pool: ThreadPool,
}

impl ApplierService {
    pub fn new(
        registry: Arc<Mutex<PlanRegistry>>,
        client: Arc<Mutex<Box<dyn ComputeClient>>>,
        workers: usize,
    ) -> Self {
        Self {
            registry,
            client,
            pool: ThreadPool::new(workers),
        }
    }

    /// Queues the plan for execution and returns immediately: success means
    /// accepted for execution, not executed.
    pub fn launch_action_plan(&self, plan: Uuid) {
        let engine = WorkflowEngine::new(self.registry.clone(), self.client.clone());
        self.pool.execute(move || match engine.run_plan(plan) {
            Ok(state) => info!("plan {} finished as {}", plan, state),
            Err(e) => warn!("plan {} aborted: {}", plan, e),
        });
    }

    /// Blocks until all queued plans have finished.
    pub fn join(&self) {
        self.pool.join();
    }
}
