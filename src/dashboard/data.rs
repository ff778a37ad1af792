//! Widget data endpoints.
//!
//! One fetch per data kind, every one of them scoped by a [`DataQuery`] and
//! cancellable through a [`CancellationToken`]. Retry policy is left to the
//! transport.

use crate::dashboard::context::{BuildId, ProjectId, SuiteId};
use crate::dashboard::error::ApiError;
use crate::dashboard::http::ApiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MOST_FAILED_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub test_suite_id: Option<SuiteId>,
    pub build_number: String,
    #[serde(default)]
    pub ci_provider: String,
    #[serde(default)]
    pub ci_url: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseExecution {
    pub id: u64,
    #[serde(default)]
    pub build_id: BuildId,
    pub test_case_id: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub failure: Option<Value>,
}

impl TestCaseExecution {
    pub fn has_failure(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| !f.is_null())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub classname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MostFailedTest {
    pub test_case_id: u64,
    pub name: String,
    pub classname: String,
    pub failure_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<i64>,
    #[serde(rename = "backgroundColor", default, skip_serializing_if = "Vec::is_empty")]
    pub background_color: Vec<String>,
    #[serde(rename = "borderColor", default, skip_serializing_if = "Vec::is_empty")]
    pub border_color: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    #[serde(rename = "xAxisLabel", default)]
    pub x_axis_label: String,
    #[serde(rename = "yAxisLabel", default)]
    pub y_axis_label: String,
}

#[derive(Debug, Deserialize)]
struct ChartDataResponse {
    chart_data: ChartData,
}

/// Scope of a single widget fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataQuery {
    pub project_id: ProjectId,
    pub suite_id: Option<SuiteId>,
    pub build_id: Option<BuildId>,
    pub limit: Option<u32>,
}

impl DataQuery {
    pub fn project(project_id: ProjectId) -> Self {
        Self {
            project_id,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait DataApi: Send + Sync {
    async fn fetch_projects(&self, cancel: &CancellationToken) -> Result<Vec<Project>, ApiError>;

    async fn fetch_builds(
        &self,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Build>, ApiError>;

    async fn fetch_executions(
        &self,
        build_id: BuildId,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestCaseExecution>, ApiError>;

    async fn fetch_most_failed_tests(
        &self,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<MostFailedTest>, ApiError>;

    async fn fetch_chart_series(
        &self,
        chart_type: &str,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<ChartData, ApiError>;
}

/// Count failed executions per test case, most failures first. Ties keep
/// ascending test case id so the order is stable.
pub fn rank_failures(executions: &[TestCaseExecution]) -> Vec<(u64, u32)> {
    let mut counts: HashMap<u64, u32> = HashMap::new();
    for execution in executions
        .iter()
        .filter(|e| e.status.eq_ignore_ascii_case("failed"))
    {
        *counts.entry(execution.test_case_id).or_default() += 1;
    }
    let mut ranked: Vec<(u64, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

pub struct HttpDataApi {
    client: ApiClient,
}

impl HttpDataApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn scope_params(query: &DataQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("project_id", query.project_id.to_string())];
    if let Some(suite) = query.suite_id {
        params.push(("suite_id", suite.to_string()));
    }
    params
}

#[async_trait]
impl DataApi for HttpDataApi {
    async fn fetch_projects(&self, cancel: &CancellationToken) -> Result<Vec<Project>, ApiError> {
        self.client.get_json("/projects", &[], cancel).await
    }

    async fn fetch_builds(
        &self,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Build>, ApiError> {
        self.client
            .get_json("/builds", &scope_params(query), cancel)
            .await
    }

    async fn fetch_executions(
        &self,
        build_id: BuildId,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestCaseExecution>, ApiError> {
        self.client
            .get_json(&format!("/builds/{build_id}/executions"), &[], cancel)
            .await
    }

    async fn fetch_most_failed_tests(
        &self,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<MostFailedTest>, ApiError> {
        let builds = self.fetch_builds(query, cancel).await?;
        let mut executions = Vec::new();
        for build in &builds {
            executions.extend(self.fetch_executions(build.id, cancel).await?);
        }

        let limit = query.limit.unwrap_or(DEFAULT_MOST_FAILED_LIMIT) as usize;
        let mut out = Vec::new();
        for (test_case_id, failure_count) in rank_failures(&executions).into_iter().take(limit) {
            let case: TestCase = self
                .client
                .get_json("/test-cases", &[("id", test_case_id.to_string())], cancel)
                .await?;
            out.push(MostFailedTest {
                test_case_id,
                name: case.name,
                classname: case.classname,
                failure_count,
            });
        }
        tracing::debug!(
            project = query.project_id,
            builds = builds.len(),
            results = out.len(),
            "aggregated most failed tests"
        );
        Ok(out)
    }

    async fn fetch_chart_series(
        &self,
        chart_type: &str,
        query: &DataQuery,
        cancel: &CancellationToken,
    ) -> Result<ChartData, ApiError> {
        let mut params = Vec::new();
        if let Some(suite) = query.suite_id {
            params.push(("suite_id", suite.to_string()));
        }
        if let Some(build) = query.build_id {
            params.push(("build_id", build.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        let path = format!(
            "/dashboard/projects/{}/chart/{chart_type}",
            query.project_id
        );
        let resp: ChartDataResponse = self.client.get_json(&path, &params, cancel).await?;
        Ok(resp.chart_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution(id: u64, case: u64, status: &str) -> TestCaseExecution {
        TestCaseExecution {
            id,
            build_id: 1,
            test_case_id: case,
            status: status.into(),
            execution_time: None,
            failure: None,
        }
    }

    #[test]
    fn failures_rank_by_count_then_id() {
        let executions = vec![
            execution(1, 7, "failed"),
            execution(2, 3, "FAILED"),
            execution(3, 7, "failed"),
            execution(4, 3, "passed"),
            execution(5, 5, "failed"),
        ];
        assert_eq!(rank_failures(&executions), vec![(7, 2), (3, 1), (5, 1)]);
    }

    #[test]
    fn chart_response_uses_camel_case_axis_labels() {
        let body = json!({
            "chart_data": {
                "labels": ["#1", "#2"],
                "datasets": [{ "label": "Passed", "data": [3, 4] }],
                "xAxisLabel": "Build",
                "yAxisLabel": "Tests"
            }
        });
        let resp: ChartDataResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.chart_data.x_axis_label, "Build");
        assert!(resp.chart_data.datasets[0].background_color.is_empty());
    }

    #[test]
    fn builds_tolerate_missing_optional_fields() {
        let build: Build =
            serde_json::from_value(json!({ "id": 2, "project_id": 1, "build_number": "42" }))
                .unwrap();
        assert_eq!(build.duration, None);
        assert!(build.ci_url.is_none());
    }
}
