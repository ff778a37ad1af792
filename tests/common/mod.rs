#![allow(dead_code)]

use async_trait::async_trait;
use results_dashboard::dashboard::config::{serialize_layouts, LayoutDocument};
use results_dashboard::dashboard::data::{
    Build, ChartData, DataApi, DataQuery, MostFailedTest, Project, TestCaseExecution,
};
use results_dashboard::dashboard::widgets::WidgetRegistry;
use results_dashboard::dashboard::{
    ApiError, Dashboard, LayoutStore, LocalCache, MemoryCache, RemoteLayoutApi,
    UserConfigPayload, UserId,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Held by a test to decide when a mocked call may return.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn open(self) {
        let _ = self.0.send(());
    }
}

pub struct SaveScript {
    pub result: Result<Option<UserConfigPayload>, ApiError>,
    pub gate: Option<oneshot::Receiver<()>>,
}

impl SaveScript {
    pub fn ok() -> Self {
        Self {
            result: Ok(None),
            gate: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            result: Err(ApiError::Network("connection reset".into())),
            gate: None,
        }
    }

    pub fn echo(payload: UserConfigPayload) -> Self {
        Self {
            result: Ok(Some(payload)),
            gate: None,
        }
    }

    /// Hold the response until the returned gate is opened.
    pub fn gated(mut self) -> (Self, Gate) {
        let (gate, rx) = Gate::new();
        self.gate = Some(rx);
        (self, gate)
    }
}

/// Remote layout API answering from scripts queued by the test. Saves
/// without a script succeed immediately.
pub struct ScriptedRemote {
    fetch: Mutex<Result<Option<UserConfigPayload>, ApiError>>,
    saves: Mutex<VecDeque<SaveScript>>,
    active_results: Mutex<VecDeque<Result<(), ApiError>>>,
    pub saved: Mutex<Vec<UserConfigPayload>>,
    pub active_saved: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<UserId>>,
}

impl ScriptedRemote {
    pub fn new(fetch: Result<Option<UserConfigPayload>, ApiError>) -> Self {
        Self {
            fetch: Mutex::new(fetch),
            saves: Mutex::new(VecDeque::new()),
            active_results: Mutex::new(VecDeque::new()),
            saved: Mutex::new(Vec::new()),
            active_saved: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Ok(None))
    }

    pub fn with_layouts(layouts: &[LayoutDocument], active: &str) -> Self {
        Self::new(Ok(Some(payload(layouts, active))))
    }

    pub fn offline() -> Self {
        Self::new(Err(ApiError::Network("connection refused".into())))
    }

    pub fn push_save(&self, script: SaveScript) {
        self.saves.lock().unwrap().push_back(script);
    }

    pub fn push_active(&self, result: Result<(), ApiError>) {
        self.active_results.lock().unwrap().push_back(result);
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn last_saved_layouts(&self) -> Vec<LayoutDocument> {
        let saved = self.saved.lock().unwrap();
        let last = saved.last().expect("no save was sent");
        serde_json::from_str(&last.layouts).unwrap()
    }
}

#[async_trait]
impl RemoteLayoutApi for ScriptedRemote {
    async fn fetch_layouts(&self, user: UserId) -> Result<Option<UserConfigPayload>, ApiError> {
        self.fetches.lock().unwrap().push(user);
        self.fetch.lock().unwrap().clone()
    }

    async fn save_layouts(
        &self,
        _user: UserId,
        payload: &UserConfigPayload,
    ) -> Result<Option<UserConfigPayload>, ApiError> {
        let script = self
            .saves
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(SaveScript::ok);
        self.saved.lock().unwrap().push(payload.clone());
        if let Some(gate) = script.gate {
            let _ = gate.await;
        }
        script.result
    }

    async fn save_active_layout_id(&self, _user: UserId, layout_id: &str) -> Result<(), ApiError> {
        self.active_saved.lock().unwrap().push(layout_id.to_string());
        self.active_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

pub fn payload(layouts: &[LayoutDocument], active: &str) -> UserConfigPayload {
    UserConfigPayload {
        layouts: serialize_layouts(layouts).unwrap(),
        active_layout_id: active.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataCall {
    pub endpoint: &'static str,
    pub query: DataQuery,
}

/// Data API returning small fixed datasets tagged with the requested
/// project so tests can tell which response was committed.
#[derive(Default)]
pub struct ScriptedData {
    calls: Mutex<Vec<DataCall>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    failure: Mutex<Option<ApiError>>,
}

impl ScriptedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call waits for the returned gate.
    pub fn gate_next(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.gates.lock().unwrap().push_back(rx);
        gate
    }

    pub fn fail_with(&self, error: Option<ApiError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> Vec<DataCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<DataQuery> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.query)
            .collect()
    }

    async fn enter(&self, endpoint: &'static str, query: DataQuery) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(DataCall { endpoint, query });
        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataApi for ScriptedData {
    async fn fetch_projects(&self, _cancel: &CancellationToken) -> Result<Vec<Project>, ApiError> {
        self.enter("projects", DataQuery::default()).await?;
        Ok(vec![
            Project {
                id: 1,
                name: "Core".into(),
            },
            Project {
                id: 2,
                name: "Web".into(),
            },
        ])
    }

    async fn fetch_builds(
        &self,
        query: &DataQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Build>, ApiError> {
        self.enter("builds", *query).await?;
        Ok(vec![Build {
            id: 100 + query.project_id,
            project_id: query.project_id,
            test_suite_id: query.suite_id,
            build_number: format!("#{}", query.project_id),
            ci_provider: "github".into(),
            ci_url: None,
            created_at: "2024-05-01T10:00:00Z".into(),
            duration: Some(42.0),
        }])
    }

    async fn fetch_executions(
        &self,
        build_id: u64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<TestCaseExecution>, ApiError> {
        self.enter(
            "executions",
            DataQuery {
                build_id: Some(build_id),
                ..DataQuery::default()
            },
        )
        .await?;
        Ok(Vec::new())
    }

    async fn fetch_most_failed_tests(
        &self,
        query: &DataQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<MostFailedTest>, ApiError> {
        self.enter("most-failed", *query).await?;
        Ok(vec![MostFailedTest {
            test_case_id: query.project_id,
            name: format!("project-{}-flaky", query.project_id),
            classname: "suite.Flaky".into(),
            failure_count: 3,
        }])
    }

    async fn fetch_chart_series(
        &self,
        _chart_type: &str,
        query: &DataQuery,
        _cancel: &CancellationToken,
    ) -> Result<ChartData, ApiError> {
        self.enter("chart", *query).await?;
        Ok(ChartData::default())
    }
}

pub fn store_with(remote: Arc<ScriptedRemote>, cache: Arc<MemoryCache>) -> Arc<LayoutStore> {
    let remote: Arc<dyn RemoteLayoutApi> = remote;
    let cache: Arc<dyn LocalCache> = cache;
    Arc::new(LayoutStore::new(
        remote,
        cache,
        Arc::new(WidgetRegistry::with_defaults()),
        Some(7),
    ))
}

pub fn dashboard_with(
    store: Arc<LayoutStore>,
    data: Arc<ScriptedData>,
) -> Dashboard {
    let data: Arc<dyn DataApi> = data;
    Dashboard::new(store, data)
}
