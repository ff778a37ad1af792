use crate::dashboard::config::WidgetInstance;
use crate::dashboard::context::{EffectiveContext, RefreshTrigger};
use crate::dashboard::data::{
    Build, ChartData, DataApi, DataQuery, MostFailedTest, TestCaseExecution,
};
use crate::dashboard::error::ApiError;
use crate::dashboard::refresh::RefreshSnapshot;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod build_chart;
mod build_duration_trend;
mod builds_table;
mod executions_summary;
mod most_failed_tests;

pub use build_chart::BuildChartConfig;
pub use build_duration_trend::BuildDurationTrendConfig;
pub use builds_table::BuildsTableConfig;
pub use executions_summary::{summarize, ExecutionStats, ExecutionsSummaryConfig};
pub use most_failed_tests::MostFailedTestsConfig;

/// Closed set of widget types the dashboard knows how to fetch and render.
/// Tags read from storage that match none of them are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WidgetKind {
    BuildsTable,
    BuildDurationTrendChart,
    BuildChart,
    MostFailedTestsTable,
    ExecutionsSummary,
    Unknown(String),
}

impl WidgetKind {
    pub const KNOWN: [WidgetKind; 5] = [
        WidgetKind::BuildsTable,
        WidgetKind::BuildDurationTrendChart,
        WidgetKind::BuildChart,
        WidgetKind::MostFailedTestsTable,
        WidgetKind::ExecutionsSummary,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            WidgetKind::BuildsTable => "builds-table",
            WidgetKind::BuildDurationTrendChart => "build-duration-trend-chart",
            WidgetKind::BuildChart => "build-chart",
            WidgetKind::MostFailedTestsTable => "most-failed-tests-table",
            WidgetKind::ExecutionsSummary => "executions-summary",
            WidgetKind::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|k| k.as_str() == tag)
            .cloned()
            .unwrap_or_else(|| WidgetKind::Unknown(tag.to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, WidgetKind::Unknown(_))
    }
}

impl From<String> for WidgetKind {
    fn from(tag: String) -> Self {
        match Self::from_tag(&tag) {
            WidgetKind::Unknown(_) => WidgetKind::Unknown(tag),
            known => known,
        }
    }
}

impl From<WidgetKind> for String {
    fn from(kind: WidgetKind) -> Self {
        match kind {
            WidgetKind::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default and minimum grid dimensions, in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub w: u32,
    pub h: u32,
    pub min_w: u32,
    pub min_h: u32,
}

impl GridSize {
    pub const fn new(w: u32, h: u32) -> Self {
        Self {
            w,
            h,
            min_w: 2,
            min_h: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Select,
    Checkbox,
    Textarea,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Live data a select field can be populated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionFeed {
    Projects,
}

/// When a config field is shown, evaluated against the other fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCondition {
    /// Shown when `key` holds a non-empty value.
    Present(String),
    /// Shown when `key` equals the given value.
    Equals(String, Value),
}

impl FieldCondition {
    pub fn holds(&self, config: &Value) -> bool {
        match self {
            FieldCondition::Present(key) => match config.get(key) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            },
            FieldCondition::Equals(key, expected) => config.get(key) == Some(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_feed: Option<OptionFeed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<FieldCondition>,
}

impl ConfigField {
    pub fn new(key: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            field_type,
            placeholder: None,
            help_text: None,
            default_value: None,
            options: Vec::new(),
            option_feed: None,
            condition: None,
        }
    }

    pub fn text(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldType::Text)
    }

    pub fn select(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldType::Select)
    }

    pub fn placeholder(mut self, text: &str) -> Self {
        self.placeholder = Some(text.to_string());
        self
    }

    pub fn help(mut self, text: &str) -> Self {
        self.help_text = Some(text.to_string());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn options_from(mut self, feed: OptionFeed) -> Self {
        self.option_feed = Some(feed);
        self
    }

    pub fn shown_when(mut self, condition: FieldCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_visible(&self, config: &Value) -> bool {
        self.condition.as_ref().map_or(true, |c| c.holds(config))
    }
}

/// Static description of a widget type.
#[derive(Clone)]
pub struct WidgetDescriptor {
    pub kind: WidgetKind,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub default_size: GridSize,
    pub refresh_on: &'static [RefreshTrigger],
    pub config_fields: Vec<ConfigField>,
    default_props: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl WidgetDescriptor {
    /// Default props are the serialized `C::default()`.
    pub fn new<C: DeserializeOwned + Serialize + Default + 'static>(
        kind: WidgetKind,
        name: &'static str,
    ) -> Self {
        Self {
            kind,
            name,
            description: "",
            category: "",
            default_size: GridSize::new(4, 4),
            refresh_on: &[],
            config_fields: Vec::new(),
            default_props: Arc::new(|| {
                serde_json::to_value(C::default()).unwrap_or_else(|_| json!({}))
            }),
        }
    }

    pub fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn category(mut self, category: &'static str) -> Self {
        self.category = category;
        self
    }

    pub fn default_size(mut self, size: GridSize) -> Self {
        self.default_size = size;
        self
    }

    pub fn refresh_on(mut self, triggers: &'static [RefreshTrigger]) -> Self {
        self.refresh_on = triggers;
        self
    }

    pub fn field(mut self, field: ConfigField) -> Self {
        self.config_fields.push(field);
        self
    }

    pub fn default_props(&self) -> Value {
        (self.default_props)()
    }
}

impl fmt::Debug for WidgetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("default_size", &self.default_size)
            .field("refresh_on", &self.refresh_on)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WidgetMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Fetched payload, one variant per data kind.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetData {
    Builds(Vec<Build>),
    Executions(Vec<TestCaseExecution>),
    MostFailed(Vec<MostFailedTest>),
    Chart(ChartData),
    /// The widget needs a build and none is selected. No request was made.
    MissingBuild,
    /// The widget type has no data source.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSegment {
    pub label: String,
    pub value: u64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetric {
    pub label: String,
    pub value: String,
}

/// Presentation-neutral description of what a widget shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum WidgetBody {
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Doughnut {
        segments: Vec<ChartSegment>,
    },
    Line {
        chart: ChartData,
    },
    Summary {
        metrics: Vec<SummaryMetric>,
    },
    Loading,
    Error {
        message: String,
    },
    Empty {
        message: String,
    },
    Placeholder {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetView {
    pub title: String,
    pub class_name: String,
    /// Error kept next to last-known-good data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    pub body: WidgetBody,
}

pub fn class_name(kind: &WidgetKind) -> String {
    format!("dashboard-component dashboard-component--{kind}")
}

#[derive(Clone, Default)]
pub struct WidgetRegistry {
    map: HashMap<WidgetKind, WidgetDescriptor>,
}

impl WidgetRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register(builds_table::descriptor());
        reg.register(build_duration_trend::descriptor());
        reg.register(build_chart::descriptor());
        reg.register(most_failed_tests::descriptor());
        reg.register(executions_summary::descriptor());
        reg
    }

    pub fn register(&mut self, descriptor: WidgetDescriptor) {
        self.map.insert(descriptor.kind.clone(), descriptor);
    }

    pub fn contains(&self, kind: &WidgetKind) -> bool {
        self.map.contains_key(kind)
    }

    pub fn resolve(&self, kind: &WidgetKind) -> Option<&WidgetDescriptor> {
        self.map.get(kind)
    }

    pub fn kinds(&self) -> Vec<WidgetKind> {
        let mut kinds: Vec<WidgetKind> = self.map.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    /// Descriptors for the "add widget" menu, grouped by category.
    pub fn metadata(&self) -> Vec<WidgetMetadata> {
        let mut meta: Vec<WidgetMetadata> = self
            .map
            .values()
            .map(|d| WidgetMetadata {
                kind: d.kind.to_string(),
                name: d.name.to_string(),
                description: d.description.to_string(),
                category: d.category.to_string(),
            })
            .collect();
        meta.sort_by(|a, b| a.category.cmp(&b.category).then(a.name.cmp(&b.name)));
        meta
    }

    pub fn default_props(&self, kind: &WidgetKind) -> Option<Value> {
        self.map.get(kind).map(|d| d.default_props())
    }

    pub fn refresh_on(&self, kind: &WidgetKind) -> &'static [RefreshTrigger] {
        self.map.get(kind).map(|d| d.refresh_on).unwrap_or(&[])
    }

    /// Defaults overlaid with the user's configuration. Keys the type does
    /// not declare are kept.
    pub fn resolve_props(&self, kind: &WidgetKind, user_props: &Value) -> Value {
        let mut props = match self.default_props(kind) {
            Some(defaults) if !user_props.is_null() => merge_json(&defaults, user_props),
            Some(defaults) => defaults,
            None if user_props.is_object() => user_props.clone(),
            None => json!({}),
        };
        if let Value::Object(map) = &mut props {
            map.remove("isStatic");
        }
        props
    }

    /// Fields of `kind` whose visibility condition holds for `config`.
    pub fn visible_fields(&self, kind: &WidgetKind, config: &Value) -> Vec<&ConfigField> {
        self.map
            .get(kind)
            .map(|d| {
                d.config_fields
                    .iter()
                    .filter(|f| f.is_visible(config))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Static options of `field`, followed by the ones from its live feed.
    pub async fn load_options(
        &self,
        field: &ConfigField,
        api: &dyn DataApi,
        cancel: &CancellationToken,
    ) -> Result<Vec<SelectOption>, ApiError> {
        let mut options = field.options.clone();
        match field.option_feed {
            Some(OptionFeed::Projects) => {
                let projects = api.fetch_projects(cancel).await?;
                options.extend(projects.into_iter().map(|p| SelectOption {
                    value: p.id.to_string(),
                    label: p.name,
                }));
            }
            None => {}
        }
        Ok(options)
    }

    pub fn render(
        &self,
        instance: &WidgetInstance,
        effective: &EffectiveContext,
        snapshot: &RefreshSnapshot<WidgetData>,
    ) -> WidgetView {
        let descriptor = self.resolve(&instance.kind);
        let title = instance
            .title()
            .map(str::to_string)
            .or_else(|| descriptor.map(|d| d.name.to_string()))
            .unwrap_or_else(|| instance.kind.to_string());
        let mut view = WidgetView {
            title,
            class_name: class_name(&instance.kind),
            banner: None,
            body: WidgetBody::Loading,
        };
        if descriptor.is_none() {
            view.body = WidgetBody::Placeholder {
                message: format!("Unknown widget type: {}", instance.kind),
            };
            return view;
        }
        if effective.project_id.is_none() {
            view.body = WidgetBody::Placeholder {
                message: "Select a project to view data.".into(),
            };
            return view;
        }
        view.body = match (&snapshot.data, &snapshot.error) {
            (Some(data), error) => {
                view.banner = error.as_ref().map(ToString::to_string);
                render_data(&instance.kind, &instance.props, data)
            }
            (None, _) if snapshot.is_loading => WidgetBody::Loading,
            (None, Some(error)) => WidgetBody::Error {
                message: error.to_string(),
            },
            (None, None) => WidgetBody::Loading,
        };
        view
    }
}

fn render_data(kind: &WidgetKind, props: &Value, data: &WidgetData) -> WidgetBody {
    match data {
        WidgetData::MissingBuild => {
            return WidgetBody::Placeholder {
                message: "Select a build to view data.".into(),
            }
        }
        WidgetData::Unsupported => {
            return WidgetBody::Placeholder {
                message: format!("Unknown widget type: {kind}"),
            }
        }
        _ => {}
    }
    let body = match kind {
        WidgetKind::BuildsTable => builds_table::render(data),
        WidgetKind::BuildDurationTrendChart => build_duration_trend::render(data),
        WidgetKind::BuildChart => build_chart::render(data),
        WidgetKind::MostFailedTestsTable => {
            most_failed_tests::render(&config_from::<MostFailedTestsConfig>(props), data)
        }
        WidgetKind::ExecutionsSummary => executions_summary::render(data),
        WidgetKind::Unknown(_) => None,
    };
    body.unwrap_or_else(|| {
        tracing::warn!(widget = %kind, "fetched data does not match widget type");
        WidgetBody::Empty {
            message: "No data available.".into(),
        }
    })
}

/// Fetch the data `kind` displays. Kinds that need a build return
/// [`WidgetData::MissingBuild`] without touching the network.
pub async fn fetch_widget_data(
    kind: &WidgetKind,
    api: &dyn DataApi,
    query: &DataQuery,
    cancel: &CancellationToken,
) -> Result<WidgetData, ApiError> {
    match kind {
        WidgetKind::BuildsTable => builds_table::fetch(api, query, cancel).await,
        WidgetKind::BuildDurationTrendChart => {
            build_duration_trend::fetch(api, query, cancel).await
        }
        WidgetKind::BuildChart | WidgetKind::ExecutionsSummary => match query.build_id {
            Some(build_id) => api
                .fetch_executions(build_id, cancel)
                .await
                .map(WidgetData::Executions),
            None => Ok(WidgetData::MissingBuild),
        },
        WidgetKind::MostFailedTestsTable => most_failed_tests::fetch(api, query, cancel).await,
        WidgetKind::Unknown(_) => Ok(WidgetData::Unsupported),
    }
}

pub(crate) fn config_from<C: DeserializeOwned + Default>(props: &Value) -> C {
    serde_json::from_value(props.clone()).unwrap_or_default()
}

pub(crate) fn merge_json(base: &Value, updates: &Value) -> Value {
    match (base, updates) {
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            for (k, v) in b {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => updates.clone(),
    }
}

/// Accept a count stored as a number or a numeric string. Form inputs
/// write strings.
pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| D::Error::custom(format!("invalid count {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid count {s:?}"))),
        other => Err(D::Error::custom(format!("invalid count {other}"))),
    }
}
