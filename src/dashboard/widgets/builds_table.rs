use super::{ConfigField, FieldCondition, GridSize, OptionFeed, WidgetBody, WidgetData, WidgetDescriptor, WidgetKind};
use crate::dashboard::context::RefreshTrigger;
use crate::dashboard::data::{Build, DataApi, DataQuery};
use crate::dashboard::error::ApiError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildsTableConfig {
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for BuildsTableConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

fn default_title() -> String {
    "Recent Builds".into()
}

pub(super) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor::new::<BuildsTableConfig>(WidgetKind::BuildsTable, "Builds Table")
        .description("Displays a table of recent builds.")
        .category("Tables")
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
    api.fetch_builds(query, cancel).await.map(WidgetData::Builds)
}

pub(super) fn render(data: &WidgetData) -> Option<WidgetBody> {
    let WidgetData::Builds(builds) = data else {
        return None;
    };
    if builds.is_empty() {
        return Some(WidgetBody::Empty {
            message: "No builds found.".into(),
        });
    }
    Some(WidgetBody::Table {
        columns: ["Build ID", "Build Number", "CI Provider", "CI URL", "Created"]
            .into_iter()
            .map(String::from)
            .collect(),
        rows: builds.iter().map(row).collect(),
    })
}

fn row(build: &Build) -> Vec<String> {
    vec![
        format!("#{}", build.id),
        build.build_number.clone(),
        build.ci_provider.clone(),
        build.ci_url.clone().unwrap_or_default(),
        build.created_at.clone(),
    ]
}
