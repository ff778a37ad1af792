use crate::dashboard::error::LayoutError;
use crate::dashboard::layout::reconcile_placements;
use crate::dashboard::widgets::{merge_json, WidgetKind, WidgetRegistry};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema version written into every document created by this engine.
/// Stored documents below it are discarded, never migrated.
pub const LAYOUT_VERSION: u32 = 2;

pub const DEFAULT_LAYOUT_ID: &str = "default";

fn default_visible() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_settings() -> Value {
    json!({ "theme": "light", "layout": "grid", "spacing": "normal" })
}

/// One configured occurrence of a widget type within a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    #[serde(default = "empty_object")]
    pub props: Value,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub is_static: bool,
}

impl WidgetInstance {
    pub fn new(id: impl Into<String>, kind: WidgetKind, props: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            props,
            visible: true,
            is_static: false,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.props
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
    }
}

/// Grid cell geometry for one visible widget instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementEntry {
    #[serde(rename = "i")]
    pub instance_id: String,
    pub x: u32,
    pub y: u32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
    #[serde(rename = "minW", default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u32>,
    #[serde(rename = "minH", default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<u32>,
}

impl PlacementEntry {
    pub fn new(instance_id: impl Into<String>, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            x,
            y,
            width,
            height,
            min_width: None,
            min_height: None,
        }
    }
}

/// A user's persisted arrangement of widgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub components: Vec<WidgetInstance>,
    #[serde(rename = "gridLayout", default)]
    pub grid_placement: Vec<PlacementEntry>,
    #[serde(default = "default_settings")]
    pub settings: Value,
}

impl Default for LayoutDocument {
    fn default() -> Self {
        let components = vec![
            WidgetInstance::new(
                "builds-1",
                WidgetKind::BuildsTable,
                json!({ "title": "Recent Builds" }),
            ),
            WidgetInstance::new(
                "build-duration-trend-chart-1",
                WidgetKind::BuildDurationTrendChart,
                json!({ "title": "Build Duration Trend", "projectId": 1, "suiteId": 1 }),
            ),
            WidgetInstance::new(
                "chart-1",
                WidgetKind::BuildChart,
                json!({ "title": "Build Status", "buildId": "1" }),
            ),
            WidgetInstance::new(
                "most-failed-tests-table-1",
                WidgetKind::MostFailedTestsTable,
                json!({ "title": "Most Failed Tests", "projectId": 1, "limit": 10 }),
            ),
            WidgetInstance::new(
                "summary-1",
                WidgetKind::ExecutionsSummary,
                json!({ "title": "Test Summary", "buildId": "1" }),
            ),
        ];
        let grid_placement = vec![
            PlacementEntry::new("builds-1", 0, 0, 4, 6),
            PlacementEntry::new("chart-1", 8, 0, 3, 6),
            PlacementEntry::new("build-duration-trend-chart-1", 4, 0, 4, 6),
            PlacementEntry::new("most-failed-tests-table-1", 0, 6, 5, 5),
            PlacementEntry::new("summary-1", 8, 6, 6, 3),
        ];
        Self {
            id: DEFAULT_LAYOUT_ID.into(),
            name: "Default Dashboard".into(),
            version: LAYOUT_VERSION,
            components,
            grid_placement,
            settings: default_settings(),
        }
    }
}

impl LayoutDocument {
    /// A blank document with a fresh id.
    pub fn new_empty(name: impl Into<String>) -> Self {
        Self {
            id: unique_suffix_id("layout"),
            name: name.into(),
            version: LAYOUT_VERSION,
            components: Vec::new(),
            grid_placement: Vec::new(),
            settings: default_settings(),
        }
    }

    pub fn instance(&self, id: &str) -> Option<&WidgetInstance> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn instance_mut(&mut self, id: &str) -> Option<&mut WidgetInstance> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    pub fn placement_for(&self, id: &str) -> Option<&PlacementEntry> {
        self.grid_placement.iter().find(|p| p.instance_id == id)
    }

    pub fn visible_instances(&self) -> impl Iterator<Item = &WidgetInstance> {
        self.components.iter().filter(|c| c.visible)
    }

    pub fn is_outdated(&self) -> bool {
        self.version < LAYOUT_VERSION
    }

    /// Generate an instance id for `kind` that does not collide with any id
    /// already present in this document.
    pub fn next_instance_id(&self, kind: &WidgetKind) -> String {
        loop {
            let candidate = unique_suffix_id(kind.as_str());
            if self.instance(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Fill in missing props from registry defaults and repair the
    /// placement set. Unknown widget types are kept so they can render as
    /// placeholders.
    pub fn sanitize(&mut self, registry: &WidgetRegistry) -> Vec<String> {
        let mut warnings = Vec::new();
        for component in &mut self.components {
            if !registry.contains(&component.kind) {
                tracing::warn!(
                    layout = %self.id,
                    widget = %component.kind,
                    "unknown dashboard widget kept as placeholder"
                );
                warnings.push(format!(
                    "unknown dashboard widget '{}' kept as placeholder",
                    component.kind
                ));
            }
            if component.props.is_null() {
                component.props = registry
                    .default_props(&component.kind)
                    .unwrap_or_else(empty_object);
            } else if let Some(defaults) = registry.default_props(&component.kind) {
                component.props = merge_json(&defaults, &component.props);
            }
        }
        warnings.extend(reconcile_placements(self, registry));
        warnings
    }
}

fn unique_suffix_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let salt: u32 = rand::thread_rng().gen();
    format!("{prefix}-{millis}-{salt:08x}")
}

/// Cache blob stored under [`crate::dashboard::cache::LAYOUT_CACHE_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredLayouts {
    pub layouts: Vec<LayoutDocument>,
    #[serde(default)]
    pub active_layout_id: Option<String>,
}

impl StoredLayouts {
    /// Parse a cache entry, rejecting it when it is malformed, empty or
    /// written by an older engine version.
    pub fn from_cache_str(content: &str) -> Result<Self, LayoutError> {
        let mut stored: StoredLayouts = serde_json::from_str(content)?;
        stored.layouts = current_documents(stored.layouts)?;
        Ok(stored)
    }

    pub fn to_cache_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode the opaque `layouts` string exchanged with the remote store.
pub fn parse_layouts_blob(blob: &str) -> Result<Vec<LayoutDocument>, LayoutError> {
    if blob.trim().is_empty() {
        return Err(LayoutError::Empty);
    }
    let layouts: Vec<LayoutDocument> = serde_json::from_str(blob)?;
    current_documents(layouts)
}

pub fn serialize_layouts(layouts: &[LayoutDocument]) -> Result<String, serde_json::Error> {
    serde_json::to_string(layouts)
}

fn current_documents(layouts: Vec<LayoutDocument>) -> Result<Vec<LayoutDocument>, LayoutError> {
    if layouts.is_empty() {
        return Err(LayoutError::Empty);
    }
    let mut oldest = None;
    let current: Vec<LayoutDocument> = layouts
        .into_iter()
        .filter(|doc| {
            if doc.is_outdated() {
                tracing::warn!(
                    layout = %doc.id,
                    version = doc.version,
                    current = LAYOUT_VERSION,
                    "discarding outdated layout document"
                );
                oldest = Some(oldest.map_or(doc.version, |v: u32| v.min(doc.version)));
                false
            } else {
                true
            }
        })
        .collect();
    match (current.is_empty(), oldest) {
        (true, Some(found)) => Err(LayoutError::Outdated {
            found,
            current: LAYOUT_VERSION,
        }),
        (true, None) => Err(LayoutError::Empty),
        _ => Ok(current),
    }
}
