use crate::dashboard::config::{PlacementEntry, WidgetInstance};
use crate::dashboard::context::{
    id_prop, BuildId, EffectiveContext, ProjectId, SelectionContext, SuiteId,
};
use crate::dashboard::data::{DataApi, DataQuery};
use crate::dashboard::diagnostics::{DiagnosticsSnapshot, FetchDiagnostics};
use crate::dashboard::error::ApiError;
use crate::dashboard::layout::visible_placements;
use crate::dashboard::lock;
use crate::dashboard::refresh::{RefreshSnapshot, SmartRefresh};
use crate::dashboard::store::{LayoutStore, LoadSource, MutationOutcome, SkipReason, StoreStatus};
use crate::dashboard::widgets::{fetch_widget_data, WidgetData, WidgetKind, WidgetRegistry, WidgetView};
use serde::Serialize;
use serde_json::Value;
use siphasher::sip::SipHasher24;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One grid cell ready for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedWidget {
    pub instance_id: String,
    pub placement: PlacementEntry,
    pub view: WidgetView,
    pub removable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardFrame {
    pub layout_id: Option<String>,
    pub layout_name: Option<String>,
    pub editing: bool,
    pub selection: SelectionContext,
    pub status: StoreStatus,
    pub widgets: Vec<RenderedWidget>,
}

struct WidgetRuntime {
    hash: u64,
    refresh: SmartRefresh<WidgetData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuntimeKey {
    id: String,
    kind: WidgetKind,
}

impl RuntimeKey {
    fn from_instance(instance: &WidgetInstance) -> Self {
        Self {
            id: instance.id.clone(),
            kind: instance.kind.clone(),
        }
    }
}

fn instance_hash(instance: &WidgetInstance) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(instance.kind.as_str().as_bytes());
    hasher.write_u8(instance.is_static as u8);
    if let Ok(bytes) = serde_json::to_vec(&instance.props) {
        hasher.write(&bytes);
    }
    hasher.finish()
}

/// Page-level composition of the selection, the layout store and one
/// refresh engine per visible widget.
pub struct Dashboard {
    store: Arc<LayoutStore>,
    registry: Arc<WidgetRegistry>,
    data_api: Arc<dyn DataApi>,
    selection: SelectionContext,
    runtimes: HashMap<RuntimeKey, WidgetRuntime>,
    diagnostics: Arc<Mutex<FetchDiagnostics>>,
    editing: bool,
}

impl Dashboard {
    pub fn new(store: Arc<LayoutStore>, data_api: Arc<dyn DataApi>) -> Self {
        let registry = Arc::clone(store.registry());
        Self {
            store,
            registry,
            data_api,
            selection: SelectionContext::default(),
            runtimes: HashMap::new(),
            diagnostics: Arc::new(Mutex::new(FetchDiagnostics::new())),
            editing: false,
        }
    }

    pub fn store(&self) -> &Arc<LayoutStore> {
        &self.store
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn selection(&self) -> SelectionContext {
        self.selection
    }

    pub async fn load(&mut self) -> Option<LoadSource> {
        let source = self.store.load().await;
        self.sync();
        source
    }

    pub fn select_project(&mut self, project_id: Option<ProjectId>) {
        self.set_selection(self.selection.with_project(project_id));
    }

    pub fn select_suite(&mut self, suite_id: Option<SuiteId>) {
        self.set_selection(self.selection.with_suite(suite_id));
    }

    pub fn select_build(&mut self, build_id: Option<BuildId>) {
        self.set_selection(self.selection.with_build(build_id));
    }

    pub fn set_selection(&mut self, selection: SelectionContext) {
        if self.selection != selection {
            tracing::debug!(?selection, "selection changed");
        }
        self.selection = selection;
        self.sync();
    }

    pub fn set_editing(&mut self, editing: bool) {
        self.editing = editing;
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Grid geometry from a drag or resize, replacing the whole set.
    pub async fn on_layout_change(&mut self, placements: Vec<PlacementEntry>) -> MutationOutcome {
        if !self.editing {
            return MutationOutcome::Skipped(SkipReason::EditModeOff);
        }
        let outcome = self.store.update_grid_layout(placements).await;
        self.sync();
        outcome
    }

    pub async fn add_widget(
        &mut self,
        kind: WidgetKind,
        props: Option<Value>,
        is_static: bool,
    ) -> MutationOutcome {
        let outcome = self.store.add_widget(kind, props, is_static).await;
        self.sync();
        outcome
    }

    pub async fn remove_widget(&mut self, instance_id: &str) -> MutationOutcome {
        if !self.editing {
            return MutationOutcome::Skipped(SkipReason::EditModeOff);
        }
        let outcome = self.store.remove_widget(instance_id).await;
        self.sync();
        outcome
    }

    pub async fn configure_widget(&mut self, instance_id: &str, props: Value) -> MutationOutcome {
        let outcome = self.store.update_widget_props(instance_id, props).await;
        self.sync();
        outcome
    }

    pub async fn set_widget_visible(&mut self, instance_id: &str, visible: bool) -> MutationOutcome {
        let outcome = self.store.set_widget_visible(instance_id, visible).await;
        self.sync();
        outcome
    }

    pub async fn set_active_document(&mut self, layout_id: &str) -> MutationOutcome {
        let outcome = self.store.set_active_document(layout_id).await;
        self.sync();
        outcome
    }

    pub fn dismiss_error(&self) {
        self.store.dismiss_error();
    }

    /// Reconcile refresh engines with the active document and evaluate each
    /// against the current selection. Must run inside a tokio runtime.
    pub fn sync(&mut self) {
        let Some(doc) = self.store.active_document() else {
            self.unmount_all();
            return;
        };
        let mut reusable: HashMap<RuntimeKey, WidgetRuntime> = self.runtimes.drain().collect();
        let mut runtimes = HashMap::with_capacity(reusable.len());

        for (instance, _) in visible_placements(&doc) {
            if !self.registry.contains(&instance.kind) {
                continue;
            }
            let key = RuntimeKey::from_instance(instance);
            let hash = instance_hash(instance);
            let runtime = match reusable.remove(&key) {
                Some(mut runtime) => {
                    if runtime.hash != hash {
                        tracing::debug!(widget = %instance.id, "widget props changed");
                        runtime.refresh.invalidate();
                        runtime.hash = hash;
                    }
                    runtime
                }
                None => WidgetRuntime {
                    hash,
                    refresh: SmartRefresh::new(instance.id.clone()),
                },
            };
            self.evaluate(instance, &runtime.refresh);
            runtimes.insert(key, runtime);
        }

        for (key, runtime) in reusable {
            runtime.refresh.unmount();
            lock(&self.diagnostics).forget(&key.id);
            tracing::debug!(widget = %key.id, "widget unmounted");
        }
        self.runtimes = runtimes;
    }

    fn evaluate(&self, instance: &WidgetInstance, refresh: &SmartRefresh<WidgetData>) {
        let effective = EffectiveContext::resolve(&self.selection, instance);
        let query = DataQuery {
            project_id: effective.project_id.unwrap_or_default(),
            suite_id: effective.suite_id,
            build_id: effective.build_id,
            limit: id_prop(&instance.props, "limit").and_then(|l| u32::try_from(l).ok()),
        };
        let kind = instance.kind.clone();
        let instance_id = instance.id.clone();
        let api = Arc::clone(&self.data_api);
        let diagnostics = Arc::clone(&self.diagnostics);
        refresh.evaluate(effective, self.registry.refresh_on(&kind), move |cancel| async move {
            let started = Instant::now();
            let result = fetch_widget_data(&kind, api.as_ref(), &query, &cancel).await;
            if !matches!(result, Err(ApiError::Cancelled)) {
                lock(&diagnostics).record_fetch(
                    &instance_id,
                    kind.as_str(),
                    started.elapsed(),
                    result.is_ok(),
                );
            }
            result
        });
    }

    fn unmount_all(&mut self) {
        for (_, runtime) in self.runtimes.drain() {
            runtime.refresh.unmount();
        }
    }

    /// Resolve once every mounted widget has finished fetching.
    pub async fn settled(&self) {
        for runtime in self.runtimes.values() {
            runtime.refresh.settled().await;
        }
    }

    pub fn widget_snapshot(&self, instance_id: &str) -> Option<RefreshSnapshot<WidgetData>> {
        self.runtimes
            .iter()
            .find(|(key, _)| key.id == instance_id)
            .map(|(_, rt)| rt.refresh.snapshot())
    }

    pub fn fetches_issued(&self, instance_id: &str) -> u64 {
        self.runtimes
            .iter()
            .find(|(key, _)| key.id == instance_id)
            .map_or(0, |(_, rt)| rt.refresh.fetches_issued())
    }

    pub fn mounted_widgets(&self) -> usize {
        self.runtimes.len()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        lock(&self.diagnostics).snapshot()
    }

    /// The renderable grid: visible instances that have a placement, in
    /// document order.
    pub fn frame(&self) -> DashboardFrame {
        let doc = self.store.active_document();
        let widgets = doc
            .as_ref()
            .map(|doc| {
                visible_placements(doc)
                    .into_iter()
                    .map(|(instance, placement)| {
                        let effective = EffectiveContext::resolve(&self.selection, instance);
                        let snapshot = self
                            .runtimes
                            .get(&RuntimeKey::from_instance(instance))
                            .map(|rt| rt.refresh.snapshot())
                            .unwrap_or_default();
                        RenderedWidget {
                            instance_id: instance.id.clone(),
                            placement: placement.clone(),
                            view: self.registry.render(instance, &effective, &snapshot),
                            removable: self.editing,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        DashboardFrame {
            layout_id: doc.as_ref().map(|d| d.id.clone()),
            layout_name: doc.as_ref().map(|d| d.name.clone()),
            editing: self.editing,
            selection: self.selection,
            status: self.store.status(),
            widgets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_tracks_props_and_static_flag() {
        let mut instance =
            WidgetInstance::new("w", WidgetKind::MostFailedTestsTable, json!({ "limit": 10 }));
        let base = instance_hash(&instance);
        assert_eq!(base, instance_hash(&instance.clone()));
        instance.props = json!({ "limit": 20 });
        let changed = instance_hash(&instance);
        assert_ne!(base, changed);
        instance.is_static = true;
        assert_ne!(changed, instance_hash(&instance));
    }
}
