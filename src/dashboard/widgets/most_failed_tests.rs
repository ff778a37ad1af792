use super::{lenient_u32, ConfigField, GridSize, OptionFeed, WidgetBody, WidgetData, WidgetDescriptor, WidgetKind};
use crate::dashboard::context::RefreshTrigger;
use crate::dashboard::data::{DataApi, DataQuery, DEFAULT_MOST_FAILED_LIMIT};
use crate::dashboard::error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MostFailedTestsConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_limit", deserialize_with = "lenient_u32")]
    pub limit: u32,
}

impl Default for MostFailedTestsConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            limit: default_limit(),
        }
    }
}

fn default_title() -> String {
    "Most Failed Tests".into()
}

fn default_limit() -> u32 {
    DEFAULT_MOST_FAILED_LIMIT
}

pub(super) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor::new::<MostFailedTestsConfig>(
        WidgetKind::MostFailedTestsTable,
        "Most Failed Tests Table",
    )
    .description("Displays a table of the most failed tests.")
    .category("Tables")
    .default_size(GridSize::new(5, 5))
    .refresh_on(&[RefreshTrigger::Project])
    .field(ConfigField::text("title", "Title").placeholder("Enter a title"))
    .field(ConfigField::select("projectId", "Project").options_from(OptionFeed::Projects))
    .field(
        ConfigField::text("limit", "Limit")
            .placeholder("Enter a limit")
            .default_value(json!(DEFAULT_MOST_FAILED_LIMIT)),
    )
}

pub(super) async fn fetch(
    api: &dyn DataApi,
    query: &DataQuery,
    cancel: &CancellationToken,
) -> Result<WidgetData, ApiError> {
    let query = DataQuery {
        limit: Some(query.limit.unwrap_or(DEFAULT_MOST_FAILED_LIMIT)),
        ..*query
    };
    api.fetch_most_failed_tests(&query, cancel)
        .await
        .map(WidgetData::MostFailed)
}

pub(super) fn render(cfg: &MostFailedTestsConfig, data: &WidgetData) -> Option<WidgetBody> {
    let WidgetData::MostFailed(tests) = data else {
        return None;
    };
    if tests.is_empty() {
        return Some(WidgetBody::Empty {
            message: "No failed tests found.".into(),
        });
    }
    Some(WidgetBody::Table {
        columns: vec![
            "Test Name".into(),
            "Class Name".into(),
            "Failure Count".into(),
        ],
        rows: tests
            .iter()
            .take(cfg.limit as usize)
            .map(|t| vec![t.name.clone(), t.classname.clone(), t.failure_count.to_string()])
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::data::MostFailedTest;

    #[test]
    fn table_respects_configured_limit() {
        let tests: Vec<MostFailedTest> = (0..5)
            .map(|i| MostFailedTest {
                test_case_id: i,
                name: format!("test_{i}"),
                classname: "suite.Case".into(),
                failure_count: 10 - i as u32,
            })
            .collect();
        let cfg = MostFailedTestsConfig {
            limit: 2,
            ..Default::default()
        };
        let Some(WidgetBody::Table { rows, .. }) = render(&cfg, &WidgetData::MostFailed(tests))
        else {
            panic!("expected a table");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], "10");
    }
}
