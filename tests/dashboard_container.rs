mod common;

use common::{dashboard_with, store_with, ScriptedData, ScriptedRemote};
use results_dashboard::dashboard::config::{WidgetInstance, DEFAULT_LAYOUT_ID};
use results_dashboard::dashboard::data::DataQuery;
use results_dashboard::dashboard::widgets::{WidgetBody, WidgetData};
use results_dashboard::dashboard::{
    ApiError, Dashboard, LayoutDocument, MemoryCache, MutationOutcome, PlacementEntry,
    RefreshPhase, SelectionContext, SkipReason, WidgetKind,
};
use serde_json::json;
use std::sync::Arc;

const MOST_FAILED: &str = "most-failed-tests-table-1";

async fn loaded(remote: ScriptedRemote) -> (Dashboard, Arc<ScriptedData>) {
    let data = Arc::new(ScriptedData::new());
    let store = store_with(Arc::new(remote), Arc::new(MemoryCache::new()));
    let mut dashboard = dashboard_with(store, Arc::clone(&data));
    assert!(dashboard.load().await.is_some());
    (dashboard, data)
}

fn body_of(dashboard: &Dashboard, id: &str) -> WidgetBody {
    dashboard
        .frame()
        .widgets
        .into_iter()
        .find(|w| w.instance_id == id)
        .map(|w| w.view.body)
        .unwrap_or_else(|| panic!("{id} not rendered"))
}

#[tokio::test]
async fn nothing_is_fetched_without_a_project() {
    let (dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.settled().await;
    assert!(data.calls().is_empty());

    let frame = dashboard.frame();
    assert_eq!(frame.layout_id.as_deref(), Some(DEFAULT_LAYOUT_ID));
    assert_eq!(frame.widgets.len(), 5);
    for widget in &frame.widgets {
        assert_eq!(
            widget.view.body,
            WidgetBody::Placeholder {
                message: "Select a project to view data.".into()
            }
        );
    }
}

#[tokio::test]
async fn most_failed_table_ignores_suite_changes() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.select_project(Some(2));
    dashboard.settled().await;

    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 1);
    assert_eq!(
        data.calls_to("most-failed"),
        vec![DataQuery {
            project_id: 2,
            suite_id: None,
            build_id: None,
            limit: Some(10),
        }]
    );
    assert_eq!(data.calls_to("builds").len(), 1);

    dashboard.select_suite(Some(5));
    dashboard.settled().await;
    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 1);
    assert_eq!(data.calls_to("most-failed").len(), 1);
    let builds = data.calls_to("builds");
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[1].suite_id, Some(5));

    match body_of(&dashboard, MOST_FAILED) {
        WidgetBody::Table { rows, .. } => assert_eq!(rows[0][0], "project-2-flaky"),
        other => panic!("unexpected body {other:?}"),
    }
}

#[tokio::test]
async fn most_failed_table_refetches_once_when_project_changes_under_a_fixed_suite() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.set_selection(SelectionContext::new(Some(1), Some(5), None));
    dashboard.settled().await;
    let first = data.calls_to("most-failed");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].project_id, 1);
    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 1);

    dashboard.set_selection(SelectionContext::new(Some(2), Some(5), None));
    dashboard.settled().await;
    let calls = data.calls_to("most-failed");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].project_id, 2);
    assert_eq!(calls[1].limit, Some(10));
    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 2);

    let builds = data.calls_to("builds");
    assert_eq!(builds.len(), 2);
    assert_eq!((builds[1].project_id, builds[1].suite_id), (2, Some(5)));

    match body_of(&dashboard, MOST_FAILED) {
        WidgetBody::Table { rows, .. } => assert_eq!(rows[0][0], "project-2-flaky"),
        other => panic!("unexpected body {other:?}"),
    }
}

#[tokio::test]
async fn build_widgets_wait_for_a_build() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.select_project(Some(1));
    dashboard.settled().await;
    assert!(data.calls_to("executions").is_empty());
    assert_eq!(
        body_of(&dashboard, "summary-1"),
        WidgetBody::Placeholder {
            message: "Select a build to view data.".into()
        }
    );

    dashboard.select_build(Some(9));
    dashboard.settled().await;
    let executions = data.calls_to("executions");
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|q| q.build_id == Some(9)));
    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_rows_with_banner() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.select_project(Some(1));
    dashboard.settled().await;

    data.fail_with(Some(ApiError::Network("offline".into())));
    dashboard.select_project(Some(3));
    dashboard.settled().await;

    let snapshot = dashboard.widget_snapshot(MOST_FAILED).unwrap();
    assert_eq!(snapshot.phase, RefreshPhase::Failed);
    assert!(matches!(snapshot.data, Some(WidgetData::MostFailed(_))));

    let widget = dashboard
        .frame()
        .widgets
        .into_iter()
        .find(|w| w.instance_id == MOST_FAILED)
        .unwrap();
    assert_eq!(widget.view.banner.as_deref(), Some("network error: offline"));
    match widget.view.body {
        WidgetBody::Table { rows, .. } => assert_eq!(rows[0][0], "project-1-flaky"),
        other => panic!("unexpected body {other:?}"),
    }

    let failures: u64 = dashboard
        .diagnostics()
        .widget_fetches
        .iter()
        .map(|w| w.failures)
        .sum();
    assert!(failures > 0);
}

#[tokio::test]
async fn layout_gestures_require_edit_mode() {
    let (mut dashboard, _) = loaded(ScriptedRemote::empty()).await;
    assert!(dashboard.frame().widgets.iter().all(|w| !w.removable));
    assert_eq!(
        dashboard.remove_widget("chart-1").await,
        MutationOutcome::Skipped(SkipReason::EditModeOff)
    );
    assert_eq!(
        dashboard
            .on_layout_change(vec![PlacementEntry::new("builds-1", 1, 1, 4, 6)])
            .await,
        MutationOutcome::Skipped(SkipReason::EditModeOff)
    );

    dashboard.set_editing(true);
    assert!(dashboard.frame().widgets.iter().all(|w| w.removable));
    assert!(dashboard.remove_widget("chart-1").await.is_persisted());
    let frame = dashboard.frame();
    assert_eq!(frame.widgets.len(), 4);
    assert!(frame.widgets.iter().all(|w| w.instance_id != "chart-1"));
    assert_eq!(dashboard.mounted_widgets(), 4);
}

#[tokio::test]
async fn hidden_widgets_are_not_rendered_or_refreshed() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    assert!(dashboard.set_widget_visible("builds-1", false).await.is_persisted());
    dashboard.select_project(Some(1));
    dashboard.settled().await;

    assert!(dashboard.frame().widgets.iter().all(|w| w.instance_id != "builds-1"));
    assert!(data.calls_to("builds").is_empty());
    assert_eq!(dashboard.mounted_widgets(), 4);
}

#[tokio::test]
async fn unknown_widget_types_render_as_placeholders() {
    let mut doc = LayoutDocument::default();
    doc.components.push(WidgetInstance::new(
        "legacy-1",
        WidgetKind::from_tag("legacy-widget"),
        json!({}),
    ));
    doc.grid_placement
        .push(PlacementEntry::new("legacy-1", 0, 20, 2, 2));
    let (mut dashboard, _) = loaded(ScriptedRemote::with_layouts(&[doc], DEFAULT_LAYOUT_ID)).await;
    dashboard.select_project(Some(1));
    dashboard.settled().await;

    assert_eq!(
        body_of(&dashboard, "legacy-1"),
        WidgetBody::Placeholder {
            message: "Unknown widget type: legacy-widget".into()
        }
    );
    assert_eq!(dashboard.mounted_widgets(), 5);
}

#[tokio::test]
async fn reconfiguring_a_widget_refetches_it() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    dashboard.select_project(Some(1));
    dashboard.settled().await;

    assert!(dashboard
        .configure_widget(MOST_FAILED, json!({ "limit": "3" }))
        .await
        .is_persisted());
    dashboard.settled().await;
    assert_eq!(dashboard.fetches_issued(MOST_FAILED), 2);
    let calls = data.calls_to("most-failed");
    assert_eq!(calls.last().unwrap().limit, Some(3));
}

#[tokio::test]
async fn static_widgets_use_their_own_project() {
    let (mut dashboard, data) = loaded(ScriptedRemote::empty()).await;
    assert!(dashboard
        .add_widget(
            WidgetKind::MostFailedTestsTable,
            Some(json!({ "projectId": 4 })),
            true
        )
        .await
        .is_persisted());
    dashboard.settled().await;

    let pinned: Vec<u64> = data
        .calls_to("most-failed")
        .iter()
        .map(|q| q.project_id)
        .collect();
    assert_eq!(pinned, vec![4]);

    dashboard.select_project(Some(2));
    dashboard.settled().await;
    let mut projects: Vec<u64> = data
        .calls_to("most-failed")
        .iter()
        .map(|q| q.project_id)
        .collect();
    projects.sort_unstable();
    assert_eq!(projects, vec![2, 4]);
}

#[tokio::test]
async fn switching_documents_remounts_widgets() {
    let (mut dashboard, _) = loaded(ScriptedRemote::empty()).await;
    let (id, outcome) = dashboard.store().create_document("Blank").await;
    assert!(outcome.is_persisted());
    assert!(dashboard.set_active_document(&id).await.is_persisted());

    let frame = dashboard.frame();
    assert_eq!(frame.layout_id.as_deref(), Some(id.as_str()));
    assert_eq!(frame.layout_name.as_deref(), Some("Blank"));
    assert!(frame.widgets.is_empty());
    assert_eq!(dashboard.mounted_widgets(), 0);
}
