use crate::attribution::Attribution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Open map of per-category fields. Insertion order is kept for export.
pub type Detail = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    File,
    Network,
    Command,
    Workspace,
    Metadata,
    Editor,
    Keymap,
    Modal,
    Canvas,
    Settings,
    Performance,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::File,
        Category::Network,
        Category::Command,
        Category::Workspace,
        Category::Metadata,
        Category::Editor,
        Category::Keymap,
        Category::Modal,
        Category::Canvas,
        Category::Settings,
        Category::Performance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::File => "file",
            Category::Network => "network",
            Category::Command => "command",
            Category::Workspace => "workspace",
            Category::Metadata => "metadata",
            Category::Editor => "editor",
            Category::Keymap => "keymap",
            Category::Modal => "modal",
            Category::Canvas => "canvas",
            Category::Settings => "settings",
            Category::Performance => "performance",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == needle)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// What a monitor hands to the sink. The sink stamps and interprets it.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationDraft {
    pub category: Category,
    pub origin: Attribution,
    pub action: String,
    pub detail: Detail,
}

impl ObservationDraft {
    pub fn new(category: Category, origin: Attribution, action: impl Into<String>) -> Self {
        Self {
            category,
            origin,
            action: action.into(),
            detail: Detail::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.detail.insert(key.to_string(), value.into());
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail.get(key).and_then(Value::as_str)
    }
}

/// One recorded, attributed, interpreted extension action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: Category,
    #[serde(rename = "plugin")]
    pub origin_extension: Attribution,
    pub action: String,
    #[serde(default, rename = "details")]
    pub detail: Detail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Observation {
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.detail.get(key).and_then(Value::as_str)
    }
}
