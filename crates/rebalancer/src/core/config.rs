//! Audit configuration.

use serde::{Deserialize, Serialize};

use crate::core::common::CapacityFactors;
use crate::core::metrics::Aggregation;

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct AuditConfigRaw {
    /// strategy selected by name at audit time
    pub strategy: Option<String>,
    /// factor of declared CPU capacity the planner may commit
    pub cpu_capacity_factor: Option<f64>,
    /// factor of declared RAM capacity the planner may commit
    pub ram_capacity_factor: Option<f64>,
    /// factor of declared disk capacity the planner may commit
    pub disk_capacity_factor: Option<f64>,
    /// statistics aggregation period in seconds
    pub metrics_period_secs: Option<u64>,
    /// statistics aggregation function
    pub aggregation: Option<Aggregation>,
}

/// Represents the configuration of a single audit.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    /// strategy selected by name at audit time
    pub strategy: String,
    /// factor of declared CPU capacity the planner may commit
    pub cpu_capacity_factor: f64,
    /// factor of declared RAM capacity the planner may commit
    pub ram_capacity_factor: f64,
    /// factor of declared disk capacity the planner may commit
    pub disk_capacity_factor: f64,
    /// statistics aggregation period in seconds
    pub metrics_period_secs: u64,
    /// statistics aggregation function
    pub aggregation: Aggregation,
}

impl AuditConfig {
    /// Creates an audit config with default parameter values.
    pub fn new() -> Self {
        Self {
            strategy: "basic_consolidation".to_string(),
            cpu_capacity_factor: 1.,
            ram_capacity_factor: 1.,
            disk_capacity_factor: 1.,
            metrics_period_secs: 3600,
            aggregation: Aggregation::Avg,
        }
    }

    /// Creates an audit config from a YAML document (uses default values
    /// for absent parameters).
    pub fn from_str(content: &str) -> Self {
        let data: AuditConfigRaw =
            serde_yaml::from_str(content).expect("Can't parse YAML audit config");
        Self::resolve(data)
    }

    /// Creates an audit config by reading parameter values from a .yaml file.
    pub fn from_file(file_name: &str) -> Self {
        let content = std::fs::read_to_string(file_name)
            .unwrap_or_else(|_| panic!("Can't read file {}", file_name));
        let data: AuditConfigRaw = serde_yaml::from_str(&content)
            .unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));
        Self::resolve(data)
    }

    fn resolve(data: AuditConfigRaw) -> Self {
        let default = AuditConfig::new();
        let config = Self {
            strategy: data.strategy.unwrap_or(default.strategy),
            cpu_capacity_factor: data.cpu_capacity_factor.unwrap_or(default.cpu_capacity_factor),
            ram_capacity_factor: data.ram_capacity_factor.unwrap_or(default.ram_capacity_factor),
            disk_capacity_factor: data
                .disk_capacity_factor
                .unwrap_or(default.disk_capacity_factor),
            metrics_period_secs: data.metrics_period_secs.unwrap_or(default.metrics_period_secs),
            aggregation: data.aggregation.unwrap_or(default.aggregation),
        };
        assert!(
            config.cpu_capacity_factor > 0.
                && config.ram_capacity_factor > 0.
                && config.disk_capacity_factor > 0.,
            "capacity factors must be positive"
        );
        config
    }

    pub fn capacity_factors(&self) -> CapacityFactors {
        CapacityFactors::new(
            self.cpu_capacity_factor,
            self.ram_capacity_factor,
            self.disk_capacity_factor,
        )
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::new()
    }
}
