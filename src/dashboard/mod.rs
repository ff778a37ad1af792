pub mod cache;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod layout;
pub mod refresh;
pub mod remote;
pub mod store;
pub mod widgets;

pub use cache::{FileCache, LocalCache, MemoryCache, LAYOUT_CACHE_KEY};
pub use config::{LayoutDocument, PlacementEntry, WidgetInstance, LAYOUT_VERSION};
pub use context::{EffectiveContext, RefreshTrigger, SelectionContext};
pub use dashboard::{Dashboard, DashboardFrame, RenderedWidget};
pub use data::{DataApi, DataQuery, HttpDataApi};
pub use error::{ApiError, LayoutError};
pub use refresh::{RefreshPhase, RefreshSnapshot, SmartRefresh};
pub use remote::{HttpLayoutApi, RemoteLayoutApi, UserConfigPayload, UserId};
pub use store::{LayoutState, LayoutStore, LoadSource, MutationOutcome, SkipReason, StoreStatus};
pub use widgets::{WidgetKind, WidgetRegistry, WidgetView};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
