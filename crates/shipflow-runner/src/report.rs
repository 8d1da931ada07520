//! Run report types

use chrono::{DateTime, Utc};
use serde::Serialize;
use shipflow_provider::Step;

/// Outcome of one executed (or skipped) step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
}

/// One entry of the per-run step log
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub service: String,
    pub step: Step,
    pub status: StepStatus,
    /// 1-based attempt number; 0 for skipped steps
    pub attempt: u32,
    /// Captured diagnostic output
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Terminal status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Deployed,
    Failed,
    /// Blocked by a dependency that was not deployed
    Skipped,
    /// Not finished because the run was cancelled
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Deployed => "deployed",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Skipped => "skipped",
            ServiceStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutcome {
    pub name: String,
    pub status: ServiceStatus,
    /// Target image reference
    pub image: String,
    /// Provider calls made for this service, retries included
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    /// Last captured diagnostic output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ServiceOutcome {
    pub(crate) fn new(name: impl Into<String>, image: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            name: name.into(),
            status,
            image: image.into(),
            attempts: 0,
            failed_step: None,
            output: None,
            reason: None,
            finished_at: None,
        }
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    pub service: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every service reached `deployed`
    Success,
    Partial,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// The run was cancelled before every service finished
    pub cancelled: bool,
    /// Per-service outcome in plan order
    pub services: Vec<ServiceOutcome>,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollbacks: Vec<RollbackOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn service(&self, name: &str) -> Option<&ServiceOutcome> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Service names with the given terminal status, in plan order
    pub fn names_with(&self, status: ServiceStatus) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Step log entries for one service
    pub fn steps_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a StepResult> + 'a {
        self.steps.iter().filter(move |s| s.service == service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: &[(&str, ServiceStatus)]) -> RunReport {
        let now = Utc::now();
        RunReport {
            status: if statuses.iter().all(|(_, s)| *s == ServiceStatus::Deployed) {
                RunStatus::Success
            } else {
                RunStatus::Partial
            },
            cancelled: false,
            services: statuses
                .iter()
                .map(|(name, status)| ServiceOutcome::new(*name, format!("{name}:latest"), *status))
                .collect(),
            steps: Vec::new(),
            rollbacks: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_names_with_status() {
        let report = report(&[
            ("db", ServiceStatus::Deployed),
            ("api", ServiceStatus::Failed),
            ("bot", ServiceStatus::Skipped),
        ]);
        assert!(!report.is_success());
        assert_eq!(report.names_with(ServiceStatus::Failed), vec!["api"]);
        assert_eq!(report.names_with(ServiceStatus::Skipped), vec!["bot"]);
        assert_eq!(report.service("db").unwrap().status, ServiceStatus::Deployed);
    }

    #[test]
    fn test_report_serializes_lowercase_statuses() {
        let report = report(&[("api", ServiceStatus::Deployed)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["services"][0]["status"], "deployed");
        // 空の rollbacks は出力しない
        assert!(json.get("rollbacks").is_none());
    }
}
