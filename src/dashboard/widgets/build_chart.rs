use super::executions_summary::summarize;
use super::{ChartSegment, ConfigField, GridSize, WidgetBody, WidgetData, WidgetDescriptor, WidgetKind};
use crate::dashboard::context::RefreshTrigger;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildChartConfig {
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for BuildChartConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

fn default_title() -> String {
    "Build Status".into()
}

pub(super) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor::new::<BuildChartConfig>(WidgetKind::BuildChart, "Build Chart")
        .description("Displays a doughnut chart of build status.")
        .category("Charts")
        .default_size(GridSize::new(3, 6))
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
            message: "No data available to display chart.".into(),
        });
    }
    let segment = |label: &str, value: usize, color: &str| ChartSegment {
        label: label.to_string(),
        value: value as u64,
        color: color.to_string(),
    };
    Some(WidgetBody::Doughnut {
        segments: vec![
            segment("Passed", stats.passed, "rgba(40, 167, 69, 0.8)"),
            segment("Failed", stats.failed, "rgba(220, 53, 69, 0.8)"),
            segment("Skipped", stats.skipped, "rgba(108, 117, 125, 0.8)"),
        ],
    })
}
