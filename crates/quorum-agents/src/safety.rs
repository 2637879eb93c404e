//! Hook for escalating abnormal conditions to whatever watches the swarm.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives abnormal conditions. Fire-and-forget: implementations must not block.
pub trait SafetyMonitor: Send + Sync {
    fn report_condition(
        &self,
        kind: &str,
        component: &str,
        severity: Severity,
        description: &str,
        metrics: serde_json::Value,
    );
}

/// Writes every condition to the log at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSafetyMonitor;

impl SafetyMonitor for TracingSafetyMonitor {
    fn report_condition(
        &self,
        kind: &str,
        component: &str,
        severity: Severity,
        description: &str,
        metrics: serde_json::Value,
    ) {
        match severity {
            Severity::Info => {
                info!(kind, component, %severity, %metrics, "{description}")
            }
            Severity::Warning => {
                warn!(kind, component, %severity, %metrics, "{description}")
            }
            Severity::High | Severity::Critical => {
                error!(kind, component, %severity, %metrics, "{description}")
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSafetyMonitor;

impl SafetyMonitor for NoopSafetyMonitor {
    fn report_condition(&self, _: &str, _: &str, _: Severity, _: &str, _: serde_json::Value) {}
}
