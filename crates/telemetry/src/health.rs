//! Health of the pipeline's external dependencies.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Health status for the service as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Component health state.
///
/// Components start healthy; the first failure flips them.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    healthy: AtomicBool,
    message: parking_lot::RwLock<Option<String>>,
}

impl ComponentHealth {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            healthy: AtomicBool::new(true),
            message: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_healthy(&self) {
        if !self.healthy.swap(true, Ordering::Relaxed) {
            *self.message.write() = None;
            tracing::info!(component = self.name, "Component recovered");
        }
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        let msg = msg.into();
        if self.healthy.swap(false, Ordering::Relaxed) {
            tracing::warn!(component = self.name, reason = %msg, "Component unhealthy");
        }
        *self.message.write() = Some(msg);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.message.read().clone()
    }

    fn report(&self) -> ComponentHealthReport {
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: self.is_healthy(),
            message: self.message(),
        }
    }
}

/// Aggregated health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub healthy: bool,
    pub message: Option<String>,
}

/// Health registry.
pub struct HealthRegistry {
    /// Earth-observation provider
    pub provider: ComponentHealth,
    /// Outbound alert sink
    pub alert_bus: ComponentHealth,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            provider: ComponentHealth::new("provider"),
            alert_bus: ComponentHealth::new("alert_bus"),
        }
    }

    /// Generate a health report.
    ///
    /// The provider is the only hard dependency: without it nothing is
    /// ingested. A broken alert bus only degrades the service.
    pub fn report(&self) -> HealthReport {
        let components = vec![self.provider.report(), self.alert_bus.report()];

        let status = if components.iter().all(|c| c.healthy) {
            HealthStatus::Healthy
        } else if self.provider.is_healthy() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, components }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global health registry.
pub static HEALTH: std::sync::LazyLock<HealthRegistry> =
    std::sync::LazyLock::new(HealthRegistry::new);

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
