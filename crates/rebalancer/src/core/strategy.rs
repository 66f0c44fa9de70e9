//! Optimization strategies.

use crate::core::config::AuditConfig;
use crate::core::metrics::MetricsSource;
use crate::core::model::ClusterModel;
use crate::core::solution::Solution;
use crate::core::strategies::basic_consolidation::BasicConsolidation;
use crate::error::Result;

/// Trait for implementation of optimization strategies.
///
/// A strategy is a function of the cluster model which returns a solution:
/// an ordered action sequence together with the resulting placement and its
/// efficacy. The strategy never mutates the input model; it plans on a
/// clone and performs no I/O beyond the metrics oracle it was built with.
pub trait Strategy {
    fn name(&self) -> &str;

    fn execute(&self, model: &ClusterModel) -> Result<Solution>;
}

/// Resolves a concrete strategy by the name in the audit configuration.
pub fn strategy_resolver(config: &AuditConfig, metrics: Box<dyn MetricsSource>) -> Box<dyn Strategy> {
    match config.strategy.as_str() {
        "basic_consolidation" => Box::new(BasicConsolidation::from_config(config, metrics)),
        _ => panic!("Can't resolve strategy: {}", config.strategy),
    }
}
