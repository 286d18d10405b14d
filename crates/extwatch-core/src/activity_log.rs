use crate::observation::{Category, Observation};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

pub const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;

/// Optional plugin and category constraints; `None` matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub plugin: Option<String>,
    pub category: Option<Category>,
}

impl LogFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        let plugin_ok = self
            .plugin
            .as_deref()
            .map_or(true, |plugin| observation.origin_extension.as_str() == plugin);
        let category_ok = self
            .category
            .map_or(true, |category| observation.category == category);
        plugin_ok && category_ok
    }
}

/// Append-only FIFO of observations. Never holds more than `capacity` entries.
#[derive(Clone, Debug)]
pub struct ActivityLog {
    entries: VecDeque<Observation>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LOG_ENTRIES)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_LOG_ENTRIES)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the bound, evicting the oldest entries when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_overflow();
    }

    pub fn append(&mut self, observation: Observation) {
        self.entries.push_back(observation);
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &Observation> + '_ {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Observation> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn logs_for_plugin(&self, plugin: &str) -> Vec<Observation> {
        self.filter(&LogFilter {
            plugin: Some(plugin.to_string()),
            category: None,
        })
    }

    pub fn logs_for_category(&self, category: Category) -> Vec<Observation> {
        self.filter(&LogFilter {
            plugin: None,
            category: Some(category),
        })
    }

    pub fn filter(&self, filter: &LogFilter) -> Vec<Observation> {
        self.entries
            .iter()
            .filter(|observation| filter.matches(observation))
            .cloned()
            .collect()
    }

    /// Distinct origin identities, sorted as plain strings.
    pub fn unique_plugins(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|observation| observation.origin_extension.as_str().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count_by_plugin(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for observation in &self.entries {
            *counts
                .entry(observation.origin_extension.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_category(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for observation in &self.entries {
            *counts.entry(observation.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn export_json(&self) -> Result<String> {
        let entries = self.entries.iter().collect::<Vec<_>>();
        serde_json::to_string_pretty(&entries).context("serialize activity log")
    }

    pub fn export_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create export dir: {}", parent.display()))?;
        }
        let json = self.export_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("write activity log: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::Attribution;
    use crate::observation::Detail;
    use chrono::{DateTime, Utc};

    fn obs(plugin: &str, category: Category, action: &str) -> Observation {
        Observation {
            timestamp: DateTime::<Utc>::from_timestamp_millis(0).expect("epoch"),
            category,
            origin_extension: Attribution::from_tag(plugin),
            action: action.to_string(),
            detail: Detail::new(),
            interpretation: None,
            context: None,
        }
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut log = ActivityLog::with_capacity(3);
        for i in 0..5 {
            log.append(obs("ext", Category::File, &format!("a{i}")));
        }
        let actions = log.entries().map(|o| o.action.as_str()).collect::<Vec<_>>();
        assert_eq!(actions, vec!["a2", "a3", "a4"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut log = ActivityLog::with_capacity(0);
        log.append(obs("ext", Category::File, "a"));
        log.append(obs("ext", Category::File, "b"));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.to_vec()[0].action, "b");
    }

    #[test]
    fn shrinking_capacity_drops_oldest() {
        let mut log = ActivityLog::with_capacity(10);
        for i in 0..6 {
            log.append(obs("ext", Category::Network, &format!("a{i}")));
        }
        log.set_capacity(2);
        let actions = log.entries().map(|o| o.action.as_str()).collect::<Vec<_>>();
        assert_eq!(actions, vec!["a4", "a5"]);
    }

    #[test]
    fn plugin_and_category_queries_preserve_order() {
        let mut log = ActivityLog::default();
        log.append(obs("alpha", Category::File, "1"));
        log.append(obs("beta", Category::Network, "2"));
        log.append(obs("alpha", Category::Network, "3"));
        log.append(obs("core", Category::Workspace, "4"));

        let alpha = log.logs_for_plugin("alpha");
        assert_eq!(
            alpha.iter().map(|o| o.action.as_str()).collect::<Vec<_>>(),
            vec!["1", "3"]
        );
        assert_eq!(log.logs_for_category(Category::Network).len(), 2);
        assert_eq!(log.logs_for_plugin("core").len(), 1);

        let both = log.filter(&LogFilter {
            plugin: Some("alpha".to_string()),
            category: Some(Category::Network),
        });
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].action, "3");
        assert_eq!(log.filter(&LogFilter::default()).len(), 4);
    }

    #[test]
    fn unique_plugins_sort_sentinels_among_extension_ids() {
        let mut log = ActivityLog::default();
        for plugin in ["zeta", "unknown", "core", "alpha", "core"] {
            log.append(obs(plugin, Category::File, "read"));
        }
        assert_eq!(log.unique_plugins(), vec!["alpha", "core", "unknown", "zeta"]);
    }

    #[test]
    fn aggregates_count_plugins_and_categories() {
        let mut log = ActivityLog::default();
        log.append(obs("beta", Category::File, "1"));
        log.append(obs("alpha", Category::File, "2"));
        log.append(obs("beta", Category::Command, "3"));

        assert_eq!(log.unique_plugins(), vec!["alpha", "beta"]);
        assert_eq!(log.count_by_plugin().get("beta"), Some(&2));
        assert_eq!(log.count_by_category().get(&Category::File), Some(&2));

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn export_writes_json_array() {
        let mut log = ActivityLog::default();
        log.append(obs("alpha", Category::File, "read"));

        let json = log.export_json().expect("export");
        let parsed: Vec<Observation> = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].action, "read");

        let dir = std::env::temp_dir().join(format!("extwatch-export-{}", std::process::id()));
        let path = dir.join("logs.json");
        log.export_to_path(&path).expect("export to path");
        assert!(path.is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
