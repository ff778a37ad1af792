use anyhow::Context;
use results_dashboard::dashboard::{
    Dashboard, FileCache, HttpDataApi, HttpLayoutApi, LayoutStore, WidgetRegistry,
};
use results_dashboard::dashboard::http::ApiClient;
use results_dashboard::logging;
use results_dashboard::settings::Settings;
use std::sync::Arc;
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let settings_path = args.next().unwrap_or_else(|| "settings.json".into());
    let project = args
        .next()
        .map(|p| p.parse::<u64>())
        .transpose()
        .context("project id must be a number")?;

    let settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to read settings from {settings_path}"))?;
    logging::init(settings.debug_logging, settings.log_file.clone());

    let client = ApiClient::new(&settings.api_base_url, settings.request_timeout())?;
    let registry = Arc::new(WidgetRegistry::with_defaults());
    let cache_file = settings.cache_file();
    tracing::debug!(path = %cache_file.display(), "using layout cache");
    let store = Arc::new(LayoutStore::new(
        Arc::new(HttpLayoutApi::new(client.clone())),
        Arc::new(FileCache::new(cache_file)),
        registry,
        settings.user_id,
    ));
    let mut dashboard = Dashboard::new(store, Arc::new(HttpDataApi::new(client)));

    dashboard.load().await;
    dashboard.select_project(project);
    if tokio::time::timeout(SETTLE_TIMEOUT, dashboard.settled())
        .await
        .is_err()
    {
        tracing::warn!("widgets still loading after {SETTLE_TIMEOUT:?}");
    }

    println!("{}", serde_json::to_string_pretty(&dashboard.frame())?);
    Ok(())
}
