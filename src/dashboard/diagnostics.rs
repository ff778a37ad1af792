use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const FETCH_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
pub const SLOW_FETCH_THRESHOLD: Duration = Duration::from_millis(1500);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WidgetFetchSnapshot {
    pub instance_id: String,
    pub kind: String,
    pub fetches: u64,
    pub failures: u64,
    pub last_duration_ms: u128,
    pub slow: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub widget_fetches: Vec<WidgetFetchSnapshot>,
}

struct FetchState {
    kind: String,
    fetches: u64,
    failures: u64,
    last_duration: Duration,
    last_sample: Instant,
}

/// Fetch timing per widget instance. Durations are sampled at most once
/// per interval unless a fetch crosses the slow threshold.
pub struct FetchDiagnostics {
    widgets: HashMap<String, FetchState>,
    sample_interval: Duration,
    slow_threshold: Duration,
}

impl Default for FetchDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::new_with_config(FETCH_SAMPLE_INTERVAL, SLOW_FETCH_THRESHOLD)
    }

    pub fn new_with_config(sample_interval: Duration, slow_threshold: Duration) -> Self {
        Self {
            widgets: HashMap::new(),
            sample_interval,
            slow_threshold,
        }
    }

    pub fn record_fetch(&mut self, instance_id: &str, kind: &str, duration: Duration, ok: bool) {
        let now = Instant::now();
        let slow = duration >= self.slow_threshold;
        if slow {
            tracing::warn!(
                widget = instance_id,
                kind,
                elapsed_ms = duration.as_millis() as u64,
                "slow widget fetch"
            );
        }
        let sample_interval = self.sample_interval;
        let entry = self
            .widgets
            .entry(instance_id.to_string())
            .or_insert_with(|| FetchState {
                kind: kind.to_string(),
                fetches: 0,
                failures: 0,
                last_duration: duration,
                last_sample: now,
            });
        entry.fetches += 1;
        if !ok {
            entry.failures += 1;
        }
        if entry.fetches == 1 || slow || now.duration_since(entry.last_sample) >= sample_interval {
            entry.kind = kind.to_string();
            entry.last_duration = duration;
            entry.last_sample = now;
        }
    }

    /// Stop tracking a widget that left the grid.
    pub fn forget(&mut self, instance_id: &str) {
        self.widgets.remove(instance_id);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut widget_fetches: Vec<WidgetFetchSnapshot> = self
            .widgets
            .iter()
            .map(|(id, state)| WidgetFetchSnapshot {
                instance_id: id.clone(),
                kind: state.kind.clone(),
                fetches: state.fetches,
                failures: state.failures,
                last_duration_ms: state.last_duration.as_millis(),
                slow: state.last_duration >= self.slow_threshold,
            })
            .collect();
        widget_fetches.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        DiagnosticsSnapshot { widget_fetches }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_sampled_unless_slow() {
        let mut diagnostics =
            FetchDiagnostics::new_with_config(Duration::from_secs(10), Duration::from_millis(50));
        diagnostics.record_fetch("w-1", "builds-table", Duration::from_millis(10), true);
        let first = diagnostics.snapshot();
        assert_eq!(first.widget_fetches.len(), 1);
        assert_eq!(first.widget_fetches[0].last_duration_ms, 10);

        diagnostics.record_fetch("w-1", "builds-table", Duration::from_millis(5), false);
        let second = diagnostics.snapshot();
        assert_eq!(second.widget_fetches[0].last_duration_ms, 10);
        assert_eq!(second.widget_fetches[0].fetches, 2);
        assert_eq!(second.widget_fetches[0].failures, 1);

        diagnostics.record_fetch("w-1", "builds-table", Duration::from_millis(75), true);
        let third = diagnostics.snapshot();
        assert_eq!(third.widget_fetches[0].last_duration_ms, 75);
        assert!(third.widget_fetches[0].slow);
    }

    #[test]
    fn forgotten_widgets_leave_the_snapshot() {
        let mut diagnostics = FetchDiagnostics::new();
        diagnostics.record_fetch("b", "build-chart", Duration::from_millis(1), true);
        diagnostics.record_fetch("a", "builds-table", Duration::from_millis(1), true);
        let ids: Vec<_> = diagnostics
            .snapshot()
            .widget_fetches
            .into_iter()
            .map(|w| w.instance_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        diagnostics.forget("a");
        assert_eq!(diagnostics.snapshot().widget_fetches.len(), 1);
    }
}
