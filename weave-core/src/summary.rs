//! Aggregate results of a build.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::node::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeResult {
    /// The compiler ran and succeeded.
    Succeeded,
    /// Succeeded from the fingerprint cache.
    Cached,
    Failed,
    /// Never started because a dependency failed.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub result: NodeResult,
    pub duration: Duration,
    /// Captured output, kept for failures only.
    pub logs: Vec<String>,
    /// For blocked nodes, the failed dependency that blocked them.
    pub blocked_by: Option<String>,
}

/// Per-node results of one build, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    reports: Vec<NodeReport>,
    total_duration: Duration,
}

impl BuildSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, outcome: &Outcome) {
        let result = match (outcome.success, outcome.skipped) {
            (true, true) => NodeResult::Cached,
            (true, false) => NodeResult::Succeeded,
            (false, _) => NodeResult::Failed,
        };
        let logs = if outcome.success {
            Vec::new()
        } else {
            outcome.logs.clone()
        };
        self.reports.push(NodeReport {
            name: name.to_string(),
            result,
            duration: outcome.duration,
            logs,
            blocked_by: None,
        });
    }

    pub fn record_blocked(&mut self, name: &str, blocked_by: &str) {
        self.reports.push(NodeReport {
            name: name.to_string(),
            result: NodeResult::Blocked,
            duration: Duration::ZERO,
            logs: Vec::new(),
            blocked_by: Some(blocked_by.to_string()),
        });
    }

    pub fn set_total_duration(&mut self, duration: Duration) {
        self.total_duration = duration;
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn reports(&self) -> &[NodeReport] {
        &self.reports
    }

    pub fn report(&self, name: &str) -> Option<&NodeReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    fn names_with(&self, result: NodeResult) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.result == result)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn succeeded_names(&self) -> Vec<&str> {
        self.names_with(NodeResult::Succeeded)
    }

    pub fn cached_names(&self) -> Vec<&str> {
        self.names_with(NodeResult::Cached)
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.names_with(NodeResult::Failed)
    }

    pub fn blocked_names(&self) -> Vec<&str> {
        self.names_with(NodeResult::Blocked)
    }

    pub fn is_success(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(r.result, NodeResult::Succeeded | NodeResult::Cached))
    }

    /// Share of recorded nodes that succeeded, cached or not (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.reports.is_empty() {
            return 0.0;
        }
        let ok = self
            .reports
            .iter()
            .filter(|r| matches!(r.result, NodeResult::Succeeded | NodeResult::Cached))
            .count();
        ok as f64 / self.reports.len() as f64
    }

    /// Average duration of nodes that actually ran.
    pub fn average_duration(&self) -> Duration {
        let ran: Vec<Duration> = self
            .reports
            .iter()
            .filter(|r| r.result != NodeResult::Blocked)
            .map(|r| r.duration)
            .collect();
        if ran.is_empty() {
            return Duration::ZERO;
        }
        ran.iter().sum::<Duration>() / ran.len() as u32
    }

    /// Turns a summary with failures into [`Error::BuildFailed`].
    pub fn into_result(self) -> Result<BuildSummary> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::BuildFailed(Box::new(self)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Phase;

    fn outcome(success: bool, skipped: bool, millis: u64) -> Outcome {
        Outcome {
            phase: Phase::TypeCheck,
            success,
            skipped,
            duration: Duration::from_millis(millis),
            logs: vec!["line".to_string()],
        }
    }

    #[test]
    fn classifies_outcomes() {
        let mut summary = BuildSummary::new();
        summary.record("core", &outcome(true, true, 0));
        summary.record("lib", &outcome(true, false, 40));
        summary.record("api", &outcome(false, false, 20));
        summary.record_blocked("svc", "api");

        assert_eq!(summary.cached_names(), vec!["core"]);
        assert_eq!(summary.succeeded_names(), vec!["lib"]);
        assert_eq!(summary.failed_names(), vec!["api"]);
        assert_eq!(summary.blocked_names(), vec!["svc"]);
        assert_eq!(summary.report("svc").and_then(|r| r.blocked_by.as_deref()), Some("api"));
        assert_eq!(summary.report("api").map(|r| r.logs.len()), Some(1));
        assert_eq!(summary.report("lib").map(|r| r.logs.len()), Some(0));
        assert!(!summary.is_success());
        assert_eq!(summary.success_rate(), 0.5);
        assert_eq!(summary.average_duration(), Duration::from_millis(20));
    }

    #[test]
    fn failures_become_errors() {
        let mut summary = BuildSummary::new();
        summary.record("api", &outcome(false, false, 1));
        let err = summary.into_result().unwrap_err();
        assert!(err.to_string().contains("api"));

        let mut ok = BuildSummary::new();
        ok.record("core", &outcome(true, false, 1));
        assert!(ok.into_result().is_ok());
    }
}
