use super::{ConfigField, FieldCondition, GridSize, OptionFeed, WidgetBody, WidgetData, WidgetDescriptor, WidgetKind};
use crate::dashboard::context::RefreshTrigger;
use crate::dashboard::data::{DataApi, DataQuery};
use crate::dashboard::error::ApiError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub const CHART_TYPE: &str = "build-duration-trend";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDurationTrendConfig {
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for BuildDurationTrendConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

fn default_title() -> String {
    "Build Duration Trend".into()
}

pub(super) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor::new::<BuildDurationTrendConfig>(
        WidgetKind::BuildDurationTrendChart,
        "Build Duration Trend Chart",
    )
    .description("Displays a trend chart of build durations.")
    .category("Charts")
    .default_size(GridSize::new(4, 6))
    .refresh_on(&[RefreshTrigger::Project, RefreshTrigger::Suite])
    .field(ConfigField::text("title", "Title").placeholder("Enter a title"))
    .field(ConfigField::select("projectId", "Project").options_from(OptionFeed::Projects))
    .field(
        ConfigField::text("suiteId", "Suite")
            .placeholder("Enter a suite ID")
            .shown_when(FieldCondition::Present("projectId".into())),
    )
}

pub(super) async fn fetch(
    api: &dyn DataApi,
    query: &DataQuery,
    cancel: &CancellationToken,
) -> Result<WidgetData, ApiError> {
    api.fetch_chart_series(CHART_TYPE, query, cancel)
        .await
        .map(WidgetData::Chart)
}

pub(super) fn render(data: &WidgetData) -> Option<WidgetBody> {
    let WidgetData::Chart(chart) = data else {
        return None;
    };
    if chart.labels.is_empty() || chart.datasets.is_empty() {
        return Some(WidgetBody::Empty {
            message: "No build duration data available.".into(),
        });
    }
    Some(WidgetBody::Line {
        chart: chart.clone(),
    })
}
