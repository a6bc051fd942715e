use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metric {
  pub stack_id: String,
  pub container_id: Option<String>,
  pub timestamp: i64,
  pub cpu_percent: f64,
  pub memory_bytes: u64,
  pub memory_limit_bytes: u64,
  pub network_rx_mib: f64,
  pub network_tx_mib: f64,
  pub disk_read_mib: f64,
  pub disk_write_mib: f64,
}

impl Metric {
  pub fn memory_percent(&self) -> f64 {
    if self.memory_limit_bytes == 0 {
      0.0
    } else {
      (self.memory_bytes as f64 / self.memory_limit_bytes as f64) * 100.0
    }
  }
}

/// Warning/critical thresholds for a single resource dimension, spec §4.10.
#[derive(Debug, Clone, Copy)]
pub struct MetricThresholds {
  pub warning: f64,
  pub critical: f64,
}

pub const CPU_THRESHOLDS: MetricThresholds =
  MetricThresholds { warning: 75.0, critical: 90.0 };
pub const MEMORY_THRESHOLDS: MetricThresholds =
  MetricThresholds { warning: 80.0, critical: 95.0 };
pub const STORAGE_THRESHOLDS: MetricThresholds =
  MetricThresholds { warning: 85.0, critical: 95.0 };
