//! Per-widget fetch scheduling.
//!
//! A [`SmartRefresh`] is evaluated on every render with the widget's
//! effective identifiers. It starts a fetch only when a dimension listed in
//! the widget's `refresh_on` changed (or on the first evaluation), cancels
//! whatever request it superseded, and commits a result only if no newer
//! request was issued in the meantime.

use crate::dashboard::context::{EffectiveContext, RefreshTrigger};
use crate::dashboard::error::ApiError;
use crate::dashboard::http::cancellable;
use crate::dashboard::lock;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSnapshot<T> {
    pub phase: RefreshPhase,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub is_loading: bool,
}

impl<T> Default for RefreshSnapshot<T> {
    fn default() -> Self {
        Self {
            phase: RefreshPhase::Idle,
            data: None,
            error: None,
            is_loading: false,
        }
    }
}

/// What an evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// A fetch was issued under this generation.
    Started(u64),
    /// Nothing the widget listens to changed.
    Unchanged,
    /// No project in scope; the instance was reset to idle.
    Idle,
}

struct State<T> {
    phase: RefreshPhase,
    data: Option<T>,
    error: Option<ApiError>,
    generation: u64,
    cancel: Option<CancellationToken>,
    previous: Option<EffectiveContext>,
    primed: bool,
    force: bool,
    issued: u64,
}

impl<T> State<T> {
    fn cancel_in_flight(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

pub struct SmartRefresh<T> {
    label: String,
    state: Arc<Mutex<State<T>>>,
    loading: Arc<watch::Sender<bool>>,
}

impl<T: Clone + Send + 'static> SmartRefresh<T> {
    pub fn new(label: impl Into<String>) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(State {
                phase: RefreshPhase::Idle,
                data: None,
                error: None,
                generation: 0,
                cancel: None,
                previous: None,
                primed: false,
                force: false,
                issued: 0,
            })),
            loading: Arc::new(loading),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run one render step. `fetch` is called only when a fetch qualifies
    /// and receives the token that cancels it. Must be called from within a
    /// tokio runtime.
    pub fn evaluate<F, Fut>(
        &self,
        ctx: EffectiveContext,
        refresh_on: &[RefreshTrigger],
        fetch: F,
    ) -> Evaluation
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let mut state = lock(&self.state);
        let changed = match state.previous {
            None => true,
            Some(prev) => refresh_on.iter().any(|t| prev.differs_on(&ctx, *t)),
        };
        state.previous = Some(ctx);

        if ctx.project_id.is_none() {
            let was_active = state.primed || state.cancel.is_some();
            state.cancel_in_flight();
            state.generation += 1;
            state.phase = RefreshPhase::Idle;
            state.data = None;
            state.error = None;
            state.primed = false;
            drop(state);
            if was_active {
                tracing::debug!(widget = %self.label, "no project in scope; idle");
            }
            self.loading.send_replace(false);
            return Evaluation::Idle;
        }

        if state.primed && !state.force && !changed {
            return Evaluation::Unchanged;
        }

        state.cancel_in_flight();
        state.generation += 1;
        state.issued += 1;
        state.primed = true;
        state.force = false;
        state.phase = RefreshPhase::Loading;
        let generation = state.generation;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        drop(state);

        tracing::debug!(
            widget = %self.label,
            generation,
            project = ?ctx.project_id,
            suite = ?ctx.suite_id,
            build = ?ctx.build_id,
            "refresh started"
        );
        self.loading.send_replace(true);

        let fut = fetch(token.clone());
        let shared = Arc::clone(&self.state);
        let loading = Arc::clone(&self.loading);
        let label = self.label.clone();
        tokio::spawn(async move {
            let result = cancellable(&token, fut).await;
            let mut state = lock(&shared);
            if state.generation != generation {
                tracing::debug!(widget = %label, generation, "discarding superseded result");
                return;
            }
            state.cancel = None;
            match result {
                Ok(data) => {
                    state.data = Some(data);
                    state.error = None;
                    state.phase = RefreshPhase::Ready;
                }
                Err(err) => {
                    tracing::warn!(widget = %label, generation, "refresh failed: {err}");
                    state.error = Some(err);
                    state.phase = RefreshPhase::Failed;
                }
            }
            drop(state);
            loading.send_replace(false);
        });
        Evaluation::Started(generation)
    }

    /// Make the next evaluation fetch even if the context is unchanged.
    pub fn invalidate(&self) {
        lock(&self.state).force = true;
    }

    /// Cancel the in-flight request. Its result, if any, is discarded.
    pub fn unmount(&self) {
        let mut state = lock(&self.state);
        if state.cancel.is_none() {
            return;
        }
        state.cancel_in_flight();
        state.generation += 1;
        if state.phase == RefreshPhase::Loading {
            state.phase = if state.data.is_some() {
                RefreshPhase::Ready
            } else {
                RefreshPhase::Idle
            };
        }
        drop(state);
        tracing::debug!(widget = %self.label, "in-flight refresh cancelled");
        self.loading.send_replace(false);
    }

    pub fn snapshot(&self) -> RefreshSnapshot<T> {
        let state = lock(&self.state);
        RefreshSnapshot {
            phase: state.phase,
            data: state.data.clone(),
            error: state.error.clone(),
            is_loading: state.phase == RefreshPhase::Loading,
        }
    }

    /// Number of fetches issued since creation.
    pub fn fetches_issued(&self) -> u64 {
        lock(&self.state).issued
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Resolve once no fetch is in flight.
    pub async fn settled(&self) {
        let mut rx = self.loading.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|loading| !*loading).await;
    }
}

impl<T> Drop for SmartRefresh<T> {
    fn drop(&mut self) {
        lock(&self.state).cancel_in_flight();
    }
}
