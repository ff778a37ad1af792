//! Layout persistence with optimistic updates.
//!
//! The store keeps the last state the server acknowledged (`confirmed`) and
//! an ordered log of operations still waiting for the server. What callers
//! see is always `confirmed` with the pending operations replayed on top, so
//! a failed save is rolled back by dropping its entry from the log without
//! disturbing anything that was issued after it.

use crate::dashboard::cache::{LocalCache, LAYOUT_CACHE_KEY};
use crate::dashboard::config::{
    parse_layouts_blob, serialize_layouts, LayoutDocument, PlacementEntry, StoredLayouts,
    WidgetInstance, DEFAULT_LAYOUT_ID,
};
use crate::dashboard::error::ApiError;
use crate::dashboard::layout::{insert_at_origin, reconcile_placements, PLACEHOLDER_SIZE};
use crate::dashboard::lock;
use crate::dashboard::remote::{RemoteLayoutApi, UserConfigPayload, UserId};
use crate::dashboard::widgets::{merge_json, WidgetKind, WidgetRegistry};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub const LOAD_FAILED_MESSAGE: &str = "Could not connect to the server. Displaying cached data.";
pub const SAVE_FAILED_MESSAGE: &str =
    "Failed to save changes to the server. Your changes have been reverted.";
pub const ACTIVE_FAILED_MESSAGE: &str =
    "Failed to save active layout. Your change has been reverted.";

/// Documents plus the id of the one being shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutState {
    pub layouts: Vec<LayoutDocument>,
    pub active_layout_id: String,
}

impl Default for LayoutState {
    fn default() -> Self {
        Self {
            layouts: vec![LayoutDocument::default()],
            active_layout_id: DEFAULT_LAYOUT_ID.to_string(),
        }
    }
}

impl LayoutState {
    fn new(layouts: Vec<LayoutDocument>, active: Option<&str>) -> Self {
        let active_layout_id = active
            .map(str::to_string)
            .or_else(|| layouts.first().map(|d| d.id.clone()))
            .unwrap_or_else(|| DEFAULT_LAYOUT_ID.to_string());
        Self {
            layouts,
            active_layout_id,
        }
    }

    /// The active document, or the first one when the active id is unknown.
    pub fn active_document(&self) -> Option<&LayoutDocument> {
        self.layouts
            .iter()
            .find(|d| d.id == self.active_layout_id)
            .or_else(|| self.layouts.first())
    }

    fn active_document_mut(&mut self) -> Option<&mut LayoutDocument> {
        let idx = self
            .layouts
            .iter()
            .position(|d| d.id == self.active_layout_id)
            .or(if self.layouts.is_empty() { None } else { Some(0) })?;
        self.layouts.get_mut(idx)
    }

    fn document_mut(&mut self, id: &str) -> Option<&mut LayoutDocument> {
        self.layouts.iter_mut().find(|d| d.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub loading: bool,
    pub saving: bool,
    pub initialized: bool,
    /// Dismissible banner text.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Cache,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotInitialized,
    NoUser,
    NoActiveDocument,
    UnknownDocument(String),
    UnknownWidget(String),
    /// A layout gesture arrived while the grid was not editable.
    EditModeOff,
    /// A document update tried to change the persisted schema version.
    VersionChanged { stored: u32, requested: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Nothing was changed or sent.
    Skipped(SkipReason),
    Persisted,
    /// The server rejected the change and it was taken back out.
    RolledBack(ApiError),
    /// The server rejected the change, but a newer save still in flight
    /// carries it, so it stays visible until that save settles.
    Superseded(ApiError),
    /// The response arrived after the store switched users and was ignored.
    Stale,
}

impl MutationOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, MutationOutcome::Persisted)
    }
}

#[derive(Debug, Clone)]
enum PendingOp {
    Layouts(Vec<LayoutDocument>),
    Active(String),
}

#[derive(Debug, Clone)]
struct Pending {
    token: u64,
    op: PendingOp,
}

struct StoreState {
    user: Option<UserId>,
    epoch: u64,
    confirmed: LayoutState,
    pending: Vec<Pending>,
    view: LayoutState,
    next_token: u64,
    layouts_confirmed_by: u64,
    active_confirmed_by: u64,
    in_flight: usize,
    load_running: bool,
    status: StoreStatus,
}

impl StoreState {
    fn ready_user(&self) -> Result<UserId, SkipReason> {
        if !self.status.initialized {
            return Err(SkipReason::NotInitialized);
        }
        self.user.ok_or(SkipReason::NoUser)
    }

    fn issue(&mut self, op: PendingOp) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.pending.push(Pending { token, op });
        self.recompute();
        token
    }

    /// Whether a layouts save issued after `token` is still waiting. Such a
    /// save was built from a view that already included `token`'s change.
    fn layouts_pending_after(&self, token: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.token > token && matches!(p.op, PendingOp::Layouts(_)))
    }

    fn settle(&mut self, token: u64) {
        self.pending.retain(|p| p.token != token);
        self.in_flight = self.in_flight.saturating_sub(1);
        self.status.saving = self.in_flight > 0;
    }

    fn recompute(&mut self) {
        let mut view = self.confirmed.clone();
        for pending in &self.pending {
            match &pending.op {
                PendingOp::Layouts(layouts) => view.layouts = layouts.clone(),
                PendingOp::Active(id) => view.active_layout_id = id.clone(),
            }
        }
        self.view = view;
    }
}

struct SaveTicket {
    user: UserId,
    epoch: u64,
    token: u64,
    layouts: Vec<LayoutDocument>,
    active_layout_id: String,
}

pub struct LayoutStore {
    remote: Arc<dyn RemoteLayoutApi>,
    cache: Arc<dyn LocalCache>,
    registry: Arc<WidgetRegistry>,
    state: Mutex<StoreState>,
}

impl LayoutStore {
    pub fn new(
        remote: Arc<dyn RemoteLayoutApi>,
        cache: Arc<dyn LocalCache>,
        registry: Arc<WidgetRegistry>,
        user: Option<UserId>,
    ) -> Self {
        let initial = LayoutState::default();
        Self {
            remote,
            cache,
            registry,
            state: Mutex::new(StoreState {
                user,
                epoch: 0,
                confirmed: initial.clone(),
                pending: Vec::new(),
                view: initial,
                next_token: 0,
                layouts_confirmed_by: 0,
                active_confirmed_by: 0,
                in_flight: 0,
                load_running: false,
                status: StoreStatus {
                    loading: true,
                    ..StoreStatus::default()
                },
            }),
        }
    }

    pub fn registry(&self) -> &Arc<WidgetRegistry> {
        &self.registry
    }

    pub fn state(&self) -> LayoutState {
        lock(&self.state).view.clone()
    }

    pub fn layouts(&self) -> Vec<LayoutDocument> {
        lock(&self.state).view.layouts.clone()
    }

    pub fn active_layout_id(&self) -> String {
        lock(&self.state).view.active_layout_id.clone()
    }

    pub fn active_document(&self) -> Option<LayoutDocument> {
        lock(&self.state).view.active_document().cloned()
    }

    pub fn status(&self) -> StoreStatus {
        lock(&self.state).status.clone()
    }

    pub fn dismiss_error(&self) {
        lock(&self.state).status.error = None;
    }

    pub fn user(&self) -> Option<UserId> {
        lock(&self.state).user
    }

    /// Switch identity. The next `load()` fetches the new user's documents;
    /// responses still in flight for the previous user are ignored.
    pub fn set_user(&self, user: Option<UserId>) {
        let mut st = lock(&self.state);
        if st.user == user {
            return;
        }
        tracing::info!(?user, "layout store user changed");
        st.user = user;
        st.epoch += 1;
        st.pending.clear();
        st.in_flight = 0;
        st.load_running = false;
        st.status = StoreStatus {
            loading: true,
            ..StoreStatus::default()
        };
        st.recompute();
    }

    /// Fetch the user's documents once per session. Returns `None` when the
    /// store was already initialized or a load is running.
    pub async fn load(&self) -> Option<LoadSource> {
        let (user, epoch) = {
            let mut st = lock(&self.state);
            if st.status.initialized || st.load_running {
                return None;
            }
            st.load_running = true;
            st.status.loading = true;
            st.status.error = None;
            (st.user, st.epoch)
        };

        let mut banner = None;
        let remote = match user {
            Some(user) => match self.remote.fetch_layouts(user).await {
                Ok(Some(payload)) => Some(self.state_from_remote(&payload)),
                Ok(None) => {
                    tracing::info!(user, "no stored layout configuration on the server");
                    None
                }
                Err(err) => {
                    tracing::warn!(user, "failed to load layouts, using cache: {err}");
                    banner = Some(LOAD_FAILED_MESSAGE.to_string());
                    None
                }
            },
            None => None,
        };
        let (mut loaded, source) = match remote {
            Some(state) => (state, LoadSource::Remote),
            None => self.state_from_cache(),
        };
        for doc in &mut loaded.layouts {
            doc.sanitize(&self.registry);
        }

        let snapshot = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                tracing::debug!("discarding layouts loaded for a previous user");
                return None;
            }
            st.confirmed = loaded;
            st.pending.clear();
            st.recompute();
            st.status.loading = false;
            st.status.initialized = true;
            st.status.error = banner;
            st.load_running = false;
            st.view.clone()
        };
        self.mirror(&snapshot);
        tracing::info!(
            source = ?source,
            layouts = snapshot.layouts.len(),
            active = %snapshot.active_layout_id,
            "layouts loaded"
        );
        Some(source)
    }

    fn state_from_remote(&self, payload: &UserConfigPayload) -> LayoutState {
        match parse_layouts_blob(&payload.layouts) {
            Ok(layouts) => LayoutState::new(layouts, payload.active_id()),
            Err(err) => {
                tracing::warn!("server layouts unusable, using default: {err}");
                LayoutState::default()
            }
        }
    }

    fn state_from_cache(&self) -> (LayoutState, LoadSource) {
        let Some(content) = self.cache.get(LAYOUT_CACHE_KEY) else {
            tracing::debug!("no cached layouts, using default");
            return (LayoutState::default(), LoadSource::Default);
        };
        match StoredLayouts::from_cache_str(&content) {
            Ok(stored) => (
                LayoutState::new(stored.layouts, stored.active_layout_id.as_deref()),
                LoadSource::Cache,
            ),
            Err(err) => {
                tracing::warn!("discarding cached layouts: {err}");
                if let Err(e) = self.cache.remove(LAYOUT_CACHE_KEY) {
                    tracing::warn!("failed to remove cached layouts: {e}");
                }
                (LayoutState::default(), LoadSource::Default)
            }
        }
    }

    fn mirror(&self, state: &LayoutState) {
        let stored = StoredLayouts {
            layouts: state.layouts.clone(),
            active_layout_id: Some(state.active_layout_id.clone()),
        };
        let result = stored
            .to_cache_string()
            .map_err(anyhow::Error::from)
            .and_then(|blob| self.cache.set(LAYOUT_CACHE_KEY, &blob));
        if let Err(e) = result {
            tracing::warn!("failed to write layout cache: {e}");
        }
    }

    /// Replace the document with the same id as `update` and persist the
    /// whole set. The version may not change and placements are reconciled
    /// against the instances before the swap.
    pub async fn mutate(&self, mut update: LayoutDocument) -> MutationOutcome {
        let registry = Arc::clone(&self.registry);
        self.apply(move |state| {
            let slot = state
                .document_mut(&update.id)
                .ok_or_else(|| SkipReason::UnknownDocument(update.id.clone()))?;
            if update.version != slot.version {
                return Err(SkipReason::VersionChanged {
                    stored: slot.version,
                    requested: update.version,
                });
            }
            reconcile_placements(&mut update, &registry);
            *slot = update;
            Ok(())
        })
        .await
    }

    /// Replace the active document's placement set.
    pub async fn update_grid_layout(&self, placements: Vec<PlacementEntry>) -> MutationOutcome {
        let registry = Arc::clone(&self.registry);
        self.apply(move |state| {
            let doc = state
                .active_document_mut()
                .ok_or(SkipReason::NoActiveDocument)?;
            doc.grid_placement = placements;
            reconcile_placements(doc, &registry);
            Ok(())
        })
        .await
    }

    pub async fn add_widget(
        &self,
        kind: WidgetKind,
        props: Option<Value>,
        is_static: bool,
    ) -> MutationOutcome {
        let registry = Arc::clone(&self.registry);
        self.apply(move |state| {
            let doc = state
                .active_document_mut()
                .ok_or(SkipReason::NoActiveDocument)?;
            let props = registry.resolve_props(&kind, &props.unwrap_or(Value::Null));
            let size = registry
                .resolve(&kind)
                .map(|d| d.default_size)
                .unwrap_or(PLACEHOLDER_SIZE);
            let id = doc.next_instance_id(&kind);
            let mut entry = PlacementEntry::new(id.clone(), 0, 0, size.w, size.h);
            entry.min_width = Some(size.min_w);
            entry.min_height = Some(size.min_h);
            insert_at_origin(&mut doc.grid_placement, entry);
            let mut instance = WidgetInstance::new(id, kind, props);
            instance.is_static = is_static;
            tracing::debug!(layout = %doc.id, widget = %instance.id, "widget added");
            doc.components.push(instance);
            Ok(())
        })
        .await
    }

    /// Remove an instance and its placement together.
    pub async fn remove_widget(&self, instance_id: &str) -> MutationOutcome {
        self.apply(|state| {
            let doc = state
                .active_document_mut()
                .ok_or(SkipReason::NoActiveDocument)?;
            if doc.instance(instance_id).is_none() {
                return Err(SkipReason::UnknownWidget(instance_id.to_string()));
            }
            doc.components.retain(|c| c.id != instance_id);
            doc.grid_placement.retain(|p| p.instance_id != instance_id);
            Ok(())
        })
        .await
    }

    /// Merge `props` into an instance's props on the active document.
    pub async fn update_widget_props(&self, instance_id: &str, props: Value) -> MutationOutcome {
        self.apply(|state| {
            let doc = state
                .active_document_mut()
                .ok_or(SkipReason::NoActiveDocument)?;
            let instance = doc
                .instance_mut(instance_id)
                .ok_or_else(|| SkipReason::UnknownWidget(instance_id.to_string()))?;
            instance.props = merge_json(&instance.props, &props);
            Ok(())
        })
        .await
    }

    /// Hiding keeps the placement so the widget returns where it was.
    pub async fn set_widget_visible(&self, instance_id: &str, visible: bool) -> MutationOutcome {
        let registry = Arc::clone(&self.registry);
        self.apply(move |state| {
            let doc = state
                .active_document_mut()
                .ok_or(SkipReason::NoActiveDocument)?;
            let instance = doc
                .instance_mut(instance_id)
                .ok_or_else(|| SkipReason::UnknownWidget(instance_id.to_string()))?;
            instance.visible = visible;
            let kind = instance.kind.clone();
            if visible && doc.placement_for(instance_id).is_none() {
                let size = registry
                    .resolve(&kind)
                    .map(|d| d.default_size)
                    .unwrap_or(PLACEHOLDER_SIZE);
                let mut entry = PlacementEntry::new(instance_id, 0, 0, size.w, size.h);
                entry.min_width = Some(size.min_w);
                entry.min_height = Some(size.min_h);
                insert_at_origin(&mut doc.grid_placement, entry);
            }
            Ok(())
        })
        .await
    }

    pub async fn rename_document(&self, layout_id: &str, name: &str) -> MutationOutcome {
        self.apply(|state| {
            let doc = state
                .document_mut(layout_id)
                .ok_or_else(|| SkipReason::UnknownDocument(layout_id.to_string()))?;
            doc.name = name.to_string();
            Ok(())
        })
        .await
    }

    /// Display preferences are passed through untouched.
    pub async fn update_settings(&self, layout_id: &str, settings: Value) -> MutationOutcome {
        self.apply(|state| {
            let doc = state
                .document_mut(layout_id)
                .ok_or_else(|| SkipReason::UnknownDocument(layout_id.to_string()))?;
            doc.settings = settings;
            Ok(())
        })
        .await
    }

    /// Append an empty document. Returns its id with the save outcome.
    pub async fn create_document(&self, name: &str) -> (String, MutationOutcome) {
        let doc = LayoutDocument::new_empty(name);
        let id = doc.id.clone();
        let outcome = self
            .apply(move |state| {
                state.layouts.push(doc);
                Ok(())
            })
            .await;
        (id, outcome)
    }

    pub async fn set_active_document(&self, layout_id: &str) -> MutationOutcome {
        let (user, epoch, token) = {
            let mut st = lock(&self.state);
            let user = match st.ready_user() {
                Ok(user) => user,
                Err(reason) => return skipped("set active layout", reason),
            };
            if !st.view.layouts.iter().any(|d| d.id == layout_id) {
                return skipped(
                    "set active layout",
                    SkipReason::UnknownDocument(layout_id.to_string()),
                );
            }
            st.in_flight += 1;
            st.status.saving = true;
            let token = st.issue(PendingOp::Active(layout_id.to_string()));
            (user, st.epoch, token)
        };

        let result = self.remote.save_active_layout_id(user, layout_id).await;

        let (outcome, snapshot) = {
            let mut st = lock(&self.state);
            if st.epoch != epoch {
                return MutationOutcome::Stale;
            }
            st.settle(token);
            let outcome = match result {
                Ok(()) => {
                    if token > st.active_confirmed_by {
                        st.active_confirmed_by = token;
                        st.confirmed.active_layout_id = layout_id.to_string();
                    }
                    MutationOutcome::Persisted
                }
                Err(err) => {
                    tracing::warn!(layout = layout_id, "active layout not saved, reverting: {err}");
                    st.status.error = Some(ACTIVE_FAILED_MESSAGE.to_string());
                    MutationOutcome::RolledBack(err)
                }
            };
            st.recompute();
            (outcome, st.view.clone())
        };
        self.mirror(&snapshot);
        outcome
    }

    /// Apply `change` to the visible state, then persist the resulting set.
    async fn apply<F>(&self, change: F) -> MutationOutcome
    where
        F: FnOnce(&mut LayoutState) -> Result<(), SkipReason>,
    {
        let ticket = match self.begin_save(change) {
            Ok(ticket) => ticket,
            Err(reason) => return skipped("save layouts", reason),
        };
        let result = match serialize_layouts(&ticket.layouts) {
            Ok(layouts) => {
                let payload = UserConfigPayload {
                    layouts,
                    active_layout_id: ticket.active_layout_id.clone(),
                };
                self.remote.save_layouts(ticket.user, &payload).await
            }
            Err(e) => Err(ApiError::Decode(e.to_string())),
        };
        self.finish_save(ticket, result)
    }

    fn begin_save<F>(&self, change: F) -> Result<SaveTicket, SkipReason>
    where
        F: FnOnce(&mut LayoutState) -> Result<(), SkipReason>,
    {
        let mut st = lock(&self.state);
        let user = st.ready_user()?;
        let mut next = st.view.clone();
        change(&mut next)?;
        st.in_flight += 1;
        st.status.saving = true;
        st.status.error = None;
        let token = st.issue(PendingOp::Layouts(next.layouts.clone()));
        Ok(SaveTicket {
            user,
            epoch: st.epoch,
            token,
            layouts: next.layouts,
            active_layout_id: st.view.active_layout_id.clone(),
        })
    }

    fn finish_save(
        &self,
        ticket: SaveTicket,
        result: Result<Option<UserConfigPayload>, ApiError>,
    ) -> MutationOutcome {
        let (outcome, snapshot) = {
            let mut st = lock(&self.state);
            if st.epoch != ticket.epoch {
                tracing::debug!(token = ticket.token, "save finished after user change; ignored");
                return MutationOutcome::Stale;
            }
            st.settle(ticket.token);
            let outcome = match result {
                Ok(echo) => {
                    if ticket.token > st.layouts_confirmed_by {
                        st.layouts_confirmed_by = ticket.token;
                        let echoed = echo
                            .as_ref()
                            .and_then(|payload| self.echoed_layouts(payload));
                        st.confirmed.layouts = echoed.unwrap_or(ticket.layouts);
                        if ticket.token > st.active_confirmed_by {
                            st.active_confirmed_by = ticket.token;
                            st.confirmed.active_layout_id = echo
                                .as_ref()
                                .and_then(|p| p.active_id())
                                .map(str::to_string)
                                .unwrap_or(ticket.active_layout_id);
                        }
                    } else {
                        tracing::debug!(
                            token = ticket.token,
                            "acknowledged after a newer save; keeping newer state"
                        );
                    }
                    tracing::info!(token = ticket.token, "layouts saved");
                    MutationOutcome::Persisted
                }
                Err(err) if st.layouts_pending_after(ticket.token) => {
                    tracing::warn!(
                        token = ticket.token,
                        "layout save failed, newer save in flight carries the change: {err}"
                    );
                    MutationOutcome::Superseded(err)
                }
                Err(err) => {
                    tracing::warn!(token = ticket.token, "layout save failed, rolling back: {err}");
                    st.status.error = Some(SAVE_FAILED_MESSAGE.to_string());
                    MutationOutcome::RolledBack(err)
                }
            };
            st.recompute();
            (outcome, st.view.clone())
        };
        self.mirror(&snapshot);
        outcome
    }

    fn echoed_layouts(&self, payload: &UserConfigPayload) -> Option<Vec<LayoutDocument>> {
        match parse_layouts_blob(&payload.layouts) {
            Ok(mut layouts) => {
                for doc in &mut layouts {
                    doc.sanitize(&self.registry);
                }
                Some(layouts)
            }
            Err(err) => {
                tracing::debug!("save echo not usable, keeping sent layouts: {err}");
                None
            }
        }
    }
}

fn skipped(what: &str, reason: SkipReason) -> MutationOutcome {
    tracing::warn!(?reason, "{what} skipped");
    MutationOutcome::Skipped(reason)
}
