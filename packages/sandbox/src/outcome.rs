// ABOUTME: Aggregated outcome of best-effort operations such as teardown and rollback
// ABOUTME: Records each step as completed or degraded instead of aborting on the first failure

use serde::Serialize;
use std::fmt::Display;
use tracing::warn;

/// Outcome of a single best-effort step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StepOutcome {
    Completed { step: String },
    Degraded { step: String, error: String },
}

/// Collected outcomes of a best-effort flow
///
/// Failures recorded here are degraded results, never fatal to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BestEffortReport {
    pub steps: Vec<StepOutcome>,
}

impl BestEffortReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&mut self, step: impl Into<String>) {
        self.steps.push(StepOutcome::Completed { step: step.into() });
    }

    /// Record a failed step and log it as a warning
    pub fn degraded(&mut self, step: impl Into<String>, error: impl Display) {
        let step = step.into();
        let error = error.to_string();
        warn!("Best-effort step '{}' failed: {}", step, error);
        self.steps.push(StepOutcome::Degraded { step, error });
    }

    /// Record the result of a step, keeping its success value
    pub fn record<T, E: Display>(
        &mut self,
        step: impl Into<String>,
        result: Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.completed(step);
                Some(value)
            }
            Err(e) => {
                self.degraded(step, e);
                None
            }
        }
    }

    pub fn merge(&mut self, other: BestEffortReport) {
        self.steps.extend(other.steps);
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.steps.iter().filter_map(|s| match s {
            StepOutcome::Degraded { step, error } => Some((step.as_str(), error.as_str())),
            StepOutcome::Completed { .. } => None,
        })
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            StepOutcome::Completed { step } => Some(step.as_str()),
            StepOutcome::Degraded { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_failures_without_stopping() {
        let mut report = BestEffortReport::new();
        report.record("stop", Ok::<_, String>(()));
        report.record("remove", Err::<(), _>("conflict".to_string()));
        report.completed("evict");

        assert!(!report.is_clean());
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![("remove", "conflict")]);
        assert_eq!(report.completed_steps().collect::<Vec<_>>(), vec!["stop", "evict"]);
    }
}
