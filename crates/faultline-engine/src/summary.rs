//! Running counters for an exploration session, with a formatted report.

use log::{info, warn};

/// Counters accumulated across a session's iterations.
///
/// Partial counters only move for iterations that force faults; the
/// baseline run has no plan and contributes to the concrete counters only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplorationSummary {
    /// Fault-forcing iterations retired.
    pub partial_executions_attempted: u64,
    /// Of those, how many retired a plan not already in the explored set.
    pub partial_executions_executed: u64,
    /// Iterations retired, baseline included.
    pub concrete_executions_executed: u64,
    /// Of those, how many realized a novel trace-plus-faults record.
    pub unique_concrete_executions_executed: u64,
}

impl ExplorationSummary {
    /// Log the counters, warning on the mismatches that indicate a
    /// scheduling problem upstream.
    pub fn log(&self) {
        info!(
            "partial test executions attempted: {}",
            self.partial_executions_attempted
        );
        info!(
            "partial test executions executed: {}",
            self.partial_executions_executed
        );
        if self.partial_executions_attempted != self.partial_executions_executed {
            warn!(
                "number of attempted partial executions does not match the number executed; \
                 this could indicate a problem with test execution scheduling"
            );
        }

        info!(
            "concrete test executions executed: {}",
            self.concrete_executions_executed
        );
        info!(
            "unique concrete test executions executed: {}",
            self.unique_concrete_executions_executed
        );
        // Every concrete run past the baseline should have retired a novel
        // partial plan.
        if self.partial_executions_executed != 0
            && self.concrete_executions_executed != 0
            && self.partial_executions_executed != self.concrete_executions_executed - 1
        {
            warn!(
                "number of partial executions does not match the number of concrete \
                 executions minus the baseline; this could indicate a problem with \
                 test execution scheduling"
            );
        }
    }
}

/// Format a session summary for human consumption.
pub fn format_summary(summary: &ExplorationSummary) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Faultline Exploration Summary\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!(
        "Partial executions attempted: {}\n",
        summary.partial_executions_attempted
    ));
    output.push_str(&format!(
        "Partial executions executed:  {}\n",
        summary.partial_executions_executed
    ));
    output.push_str(&format!(
        "Concrete executions:          {}\n",
        summary.concrete_executions_executed
    ));
    output.push_str(&format!(
        "Unique concrete executions:   {}\n",
        summary.unique_concrete_executions_executed
    ));

    output
}
