use crate::activity_log::DEFAULT_MAX_LOG_ENTRIES;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const DEFAULT_DEBUG_FOCUS_MARKER: &str = "smart-composer";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSettings {
    #[serde(default = "default_enabled")]
    pub monitor_file_access: bool,
    #[serde(default = "default_enabled")]
    pub monitor_commands: bool,
    #[serde(default = "default_enabled")]
    pub monitor_network_calls: bool,
    #[serde(default)]
    pub show_notifications: bool,
    #[serde(default = "default_enabled")]
    pub log_to_console: bool,
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    #[serde(default = "default_enabled")]
    pub exclude_self_logs: bool,
    #[serde(default)]
    pub debug_mode: bool,
    /// Stack substring that gates promise-combinator logging in debug mode.
    #[serde(default = "default_debug_focus_marker")]
    pub debug_focus_marker: String,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            monitor_file_access: default_enabled(),
            monitor_commands: default_enabled(),
            monitor_network_calls: default_enabled(),
            show_notifications: false,
            log_to_console: default_enabled(),
            max_log_entries: default_max_log_entries(),
            exclude_self_logs: default_enabled(),
            debug_mode: false,
            debug_focus_marker: default_debug_focus_marker(),
        }
    }
}

impl WatcherSettings {
    pub fn normalized(mut self) -> Self {
        self.max_log_entries = self.max_log_entries.max(1);
        self
    }
}

/// Settings handle shared by the coordinator, the sink and every monitor.
///
/// Readers take a fresh look on every observation, so a toggle flipped at
/// runtime applies to the next intercepted call.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings(Rc<RefCell<WatcherSettings>>);

impl SharedSettings {
    pub fn new(settings: WatcherSettings) -> Self {
        Self(Rc::new(RefCell::new(settings.normalized())))
    }

    pub fn snapshot(&self) -> WatcherSettings {
        self.0.borrow().clone()
    }

    pub fn borrow(&self) -> Ref<'_, WatcherSettings> {
        self.0.borrow()
    }

    /// Reads without panicking. `None` while an update is in progress.
    pub fn read<R>(&self, f: impl FnOnce(&WatcherSettings) -> R) -> Option<R> {
        let settings = self.0.try_borrow().ok()?;
        Some(f(&settings))
    }

    /// Applies `f` and re-normalizes. Returns `None` when a reader holds the settings.
    pub fn update<R>(&self, f: impl FnOnce(&mut WatcherSettings) -> R) -> Option<R> {
        let mut settings = self.0.try_borrow_mut().ok()?;
        let out = f(&mut settings);
        settings.max_log_entries = settings.max_log_entries.max(1);
        Some(out)
    }

    pub fn replace(&self, settings: WatcherSettings) -> Option<WatcherSettings> {
        let mut current = self.0.try_borrow_mut().ok()?;
        Some(std::mem::replace(&mut *current, settings.normalized()))
    }
}

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join("settings.json")
}

pub fn load_settings(config_dir: &Path) -> Result<WatcherSettings> {
    load_settings_from_path(&settings_path(config_dir))
}

pub fn save_settings(config_dir: &Path, settings: &WatcherSettings) -> Result<()> {
    save_settings_to_path(&settings_path(config_dir), settings)
}

fn load_settings_from_path(path: &Path) -> Result<WatcherSettings> {
    if !path.exists() {
        return Ok(WatcherSettings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("read settings file: {}", path.display()))?;
    let settings: WatcherSettings = serde_json::from_str(&raw)
        .with_context(|| format!("parse settings file: {}", path.display()))?;
    Ok(settings.normalized())
}

fn save_settings_to_path(path: &Path, settings: &WatcherSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("write settings file: {}", path.display()))?;
    Ok(())
}

const fn default_enabled() -> bool {
    true
}

const fn default_max_log_entries() -> usize {
    DEFAULT_MAX_LOG_ENTRIES
}

fn default_debug_focus_marker() -> String {
    DEFAULT_DEBUG_FOCUS_MARKER.to_string()
}
