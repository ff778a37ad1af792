use super::{ConfigField, GridSize, SummaryMetric, WidgetBody, WidgetData, WidgetDescriptor, WidgetKind};
use crate::dashboard::context::RefreshTrigger;
use crate::dashboard::data::TestCaseExecution;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionsSummaryConfig {
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ExecutionsSummaryConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

fn default_title() -> String {
    "Test Summary".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Whole percent.
    pub pass_rate: u32,
    pub average_time: f64,
}

/// An execution with a recorded failure counts as failed whatever its
/// status says, and never as passed.
pub fn summarize(executions: &[TestCaseExecution]) -> ExecutionStats {
    let total = executions.len();
    if total == 0 {
        return ExecutionStats::default();
    }
    let status_is = |e: &TestCaseExecution, s: &str| e.status.eq_ignore_ascii_case(s);
    let passed = executions
        .iter()
        .filter(|e| status_is(e, "PASSED") && !e.has_failure())
        .count();
    let failed = executions
        .iter()
        .filter(|e| status_is(e, "FAILED") || e.has_failure())
        .count();
    let skipped = executions
        .iter()
        .filter(|e| status_is(e, "SKIPPED"))
        .count();
    let total_time: f64 = executions.iter().filter_map(|e| e.execution_time).sum();
    ExecutionStats {
        total,
        passed,
        failed,
        skipped,
        pass_rate: ((passed as f64 / total as f64) * 100.0).round() as u32,
        average_time: total_time / total as f64,
    }
}

pub(super) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor::new::<ExecutionsSummaryConfig>(
        WidgetKind::ExecutionsSummary,
        "Executions Summary",
    )
    .description("Displays a summary of test executions.")
    .category("Summaries")
    .default_size(GridSize::new(6, 3))
    .refresh_on(&[RefreshTrigger::Build])
    .field(ConfigField::text("title", "Title").placeholder("Enter a title"))
    .field(ConfigField::text("buildId", "Build ID").placeholder("Enter a build ID"))
}

pub(super) fn render(data: &WidgetData) -> Option<WidgetBody> {
    let WidgetData::Executions(executions) = data else {
        return None;
    };
    let stats = summarize(executions);
    if stats.total == 0 {
        return Some(WidgetBody::Empty {
            message: "No executions recorded for this build.".into(),
        });
    }
    let metric = |label: &str, value: String| SummaryMetric {
        label: label.to_string(),
        value,
    };
    Some(WidgetBody::Summary {
        metrics: vec![
            metric("Total", stats.total.to_string()),
            metric("Passed", stats.passed.to_string()),
            metric("Failed", stats.failed.to_string()),
            metric("Skipped", stats.skipped.to_string()),
            metric("Pass Rate", format!("{}%", stats.pass_rate)),
            metric("Avg Time", format!("{:.2}s", stats.average_time)),
        ],
    })
}
