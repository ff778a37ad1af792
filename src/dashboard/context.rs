//! Page-scoped selection of project, suite and build.
//!
//! The container owns the current [`SelectionContext`] and hands an immutable
//! copy to every widget evaluation. Widgets never mutate it.

use crate::dashboard::config::WidgetInstance;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ProjectId = u64;
pub type SuiteId = u64;
pub type BuildId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionContext {
    pub project_id: Option<ProjectId>,
    pub suite_id: Option<SuiteId>,
    pub build_id: Option<BuildId>,
}

impl SelectionContext {
    pub fn new(
        project_id: Option<ProjectId>,
        suite_id: Option<SuiteId>,
        build_id: Option<BuildId>,
    ) -> Self {
        Self {
            project_id,
            suite_id,
            build_id,
        }
    }

    /// Selecting a project resets the narrower selections.
    pub fn with_project(self, project_id: Option<ProjectId>) -> Self {
        Self {
            project_id,
            suite_id: None,
            build_id: None,
        }
    }

    pub fn with_suite(self, suite_id: Option<SuiteId>) -> Self {
        Self {
            suite_id,
            build_id: None,
            ..self
        }
    }

    pub fn with_build(self, build_id: Option<BuildId>) -> Self {
        Self { build_id, ..self }
    }
}

/// Context dimension a widget can declare interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTrigger {
    Project,
    Suite,
    Build,
}

/// Identifiers a widget actually fetches with: its own pinned values when
/// static, the live selection otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EffectiveContext {
    pub project_id: Option<ProjectId>,
    pub suite_id: Option<SuiteId>,
    pub build_id: Option<BuildId>,
}

impl EffectiveContext {
    pub fn resolve(selection: &SelectionContext, instance: &WidgetInstance) -> Self {
        if instance.is_static {
            Self::from_props(&instance.props)
        } else {
            Self {
                project_id: selection.project_id,
                suite_id: selection.suite_id,
                build_id: selection.build_id,
            }
        }
    }

    pub fn from_props(props: &Value) -> Self {
        Self {
            project_id: id_prop(props, "projectId"),
            suite_id: id_prop(props, "suiteId"),
            build_id: id_prop(props, "buildId"),
        }
    }

    pub fn differs_on(&self, other: &EffectiveContext, trigger: RefreshTrigger) -> bool {
        match trigger {
            RefreshTrigger::Project => self.project_id != other.project_id,
            RefreshTrigger::Suite => self.suite_id != other.suite_id,
            RefreshTrigger::Build => self.build_id != other.build_id,
        }
    }
}

/// Read an identifier stored either as a number or a numeric string.
/// Empty strings, zero and anything unparseable count as absent.
pub fn id_prop(props: &Value, key: &str) -> Option<u64> {
    let id = match props.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (id != 0).then_some(id)
}
