//! Composition root: owns the activity log and the settings, builds the sink,
//! installs monitors on a host and unwinds them on teardown.

use crate::activity_log::ActivityLog;
use crate::attribution::{Attribution, StackAttributor, StackCapture};
use crate::clock::Clock;
use crate::error::InstrumentError;
use crate::interpret::{ActivityInterpreter, Interpretation};
use crate::monitor::advanced::AdvancedApiMonitor;
use crate::monitor::canvas::CanvasMonitor;
use crate::monitor::command::CommandMonitor;
use crate::monitor::debug::DebugMonitor;
use crate::monitor::editor::EditorMonitor;
use crate::monitor::file::FileMonitor;
use crate::monitor::keymap::KeymapMonitor;
use crate::monitor::metadata::MetadataMonitor;
use crate::monitor::modal::ModalMonitor;
use crate::monitor::network::NetworkMonitor;
use crate::monitor::settings_store::SettingsStorageMonitor;
use crate::monitor::workspace::WorkspaceMonitor;
use crate::monitor::{Monitor, MonitorContext, MonitorFamily, ObservationSink};
use crate::observation::{Category, Detail, Observation, ObservationDraft};
use crate::settings::{self, SharedSettings, WatcherSettings};
use crate::surface::HostApi;
use anyhow::{Context as _, Result};
use serde_json::Value;
use std::cell::{Ref, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

/// User-facing toast for each logged observation when notifications are on.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Default notifier: routes notices to the diagnostic channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        info!(target: "extwatch::notice", "{message}");
    }
}

/// Turns drafts into log entries: self-exclusion, late re-attribution,
/// interpretation, timestamping, capacity sync and console mirroring.
pub struct WatcherSink {
    log: Rc<RefCell<ActivityLog>>,
    settings: SharedSettings,
    clock: Rc<dyn Clock>,
    interpreter: ActivityInterpreter,
    notifier: Rc<dyn Notifier>,
}

impl WatcherSink {
    pub fn new(
        log: Rc<RefCell<ActivityLog>>,
        settings: SharedSettings,
        clock: Rc<dyn Clock>,
        notifier: Rc<dyn Notifier>,
    ) -> Self {
        Self {
            log,
            settings,
            clock,
            interpreter: ActivityInterpreter::new(),
            notifier,
        }
    }
}

/// A `stack` detail carried as an array of frame strings, joined back into a trace.
fn carried_stack(detail: &Detail) -> Option<String> {
    let frames = detail.get("stack")?.as_array()?;
    let frames = frames
        .iter()
        .map(Value::as_str)
        .collect::<Option<Vec<_>>>()?;
    Some(frames.join("\n"))
}

impl ObservationSink for WatcherSink {
    fn append(&self, mut draft: ObservationDraft) -> Result<(), InstrumentError> {
        let settings = self
            .settings
            .read(WatcherSettings::clone)
            .ok_or_else(|| InstrumentError::busy("settings"))?;

        if draft.origin == Attribution::Unknown {
            if let Some(stack) = carried_stack(&draft.detail) {
                let better = StackAttributor::with_debug(settings.debug_mode).attribute(Some(&stack));
                if better != Attribution::Unknown {
                    draft.origin = better;
                }
            }
        }
        if settings.exclude_self_logs && draft.origin.is_self() {
            return Ok(());
        }

        let Interpretation {
            interpretation,
            context,
        } = self.interpreter.interpret(
            draft.category,
            draft.origin.as_str(),
            &draft.action,
            &draft.detail,
        );

        if settings.log_to_console {
            info!(
                target: "extwatch::activity",
                extension = draft.origin.as_str(),
                category = draft.category.as_str(),
                action = draft.action.as_str(),
                context = context.as_str(),
                "{interpretation}"
            );
        }
        if settings.show_notifications {
            self.notifier.notify(&format!(
                "{}: {} {}",
                draft.origin,
                draft.action,
                draft.category.as_str()
            ));
        }

        let observation = Observation {
            timestamp: self.clock.now_utc(),
            category: draft.category,
            origin_extension: draft.origin,
            action: draft.action,
            detail: draft.detail,
            interpretation: Some(interpretation),
            context: Some(context),
        };

        let mut log = self
            .log
            .try_borrow_mut()
            .map_err(|_| InstrumentError::busy("activity log"))?;
        if log.capacity() != settings.max_log_entries {
            log.set_capacity(settings.max_log_entries);
        }
        log.append(observation);
        Ok(())
    }
}

fn build_monitor(family: MonitorFamily, ctx: MonitorContext) -> Box<dyn Monitor> {
    match family {
        MonitorFamily::Network => Box::new(NetworkMonitor::new(ctx)),
        MonitorFamily::File => Box::new(FileMonitor::new(ctx)),
        MonitorFamily::Command => Box::new(CommandMonitor::new(ctx)),
        MonitorFamily::Advanced => Box::new(AdvancedApiMonitor::new(ctx)),
        MonitorFamily::Workspace => Box::new(WorkspaceMonitor::new(ctx)),
        MonitorFamily::Metadata => Box::new(MetadataMonitor::new(ctx)),
        MonitorFamily::Keymap => Box::new(KeymapMonitor::new(ctx)),
        MonitorFamily::Modal => Box::new(ModalMonitor::new(ctx)),
        MonitorFamily::Editor => Box::new(EditorMonitor::new(ctx)),
        MonitorFamily::Canvas => Box::new(CanvasMonitor::new(ctx)),
        MonitorFamily::SettingsStorage => Box::new(SettingsStorageMonitor::new(ctx)),
        MonitorFamily::AggressiveDebug => Box::new(DebugMonitor::new(ctx)),
    }
}

/// The watcher as the host sees it.
///
/// Monitors are installed by [`Self::load`] and restored in reverse order by
/// [`Self::unload`], which also runs on drop.
pub struct ExtensionWatcher {
    settings: SharedSettings,
    config_dir: Option<PathBuf>,
    log: Rc<RefCell<ActivityLog>>,
    sink: Rc<WatcherSink>,
    stack: Rc<dyn StackCapture>,
    clock: Rc<dyn Clock>,
    host: Option<Rc<HostApi>>,
    monitors: Vec<Box<dyn Monitor>>,
}

impl ExtensionWatcher {
    pub fn new(settings: WatcherSettings, stack: Rc<dyn StackCapture>, clock: Rc<dyn Clock>) -> Self {
        let settings = SharedSettings::new(settings);
        let log = Rc::new(RefCell::new(ActivityLog::with_capacity(
            settings.borrow().max_log_entries,
        )));
        let sink = Rc::new(WatcherSink::new(
            Rc::clone(&log),
            settings.clone(),
            Rc::clone(&clock),
            Rc::new(TracingNotifier),
        ));
        Self {
            settings,
            config_dir: None,
            log,
            sink,
            stack,
            clock,
            host: None,
            monitors: Vec::new(),
        }
    }

    /// A watcher that captures stacks and reads time from `host`.
    pub fn for_host(host: &HostApi, settings: WatcherSettings) -> Self {
        Self::new(settings, host.stack_capture(), host.clock_handle())
    }

    /// Like [`Self::for_host`], with settings loaded from and saved to `config_dir`.
    pub fn load_from_dir(host: &HostApi, config_dir: &Path) -> Result<Self> {
        let settings = settings::load_settings(config_dir)?;
        let mut watcher = Self::for_host(host, settings);
        watcher.config_dir = Some(config_dir.to_path_buf());
        Ok(watcher)
    }

    /// Replaces the notifier. Only monitors installed afterwards see the new one.
    pub fn with_notifier(mut self, notifier: Rc<dyn Notifier>) -> Self {
        self.sink = Rc::new(WatcherSink::new(
            Rc::clone(&self.log),
            self.settings.clone(),
            Rc::clone(&self.clock),
            notifier,
        ));
        self
    }

    fn context(&self) -> MonitorContext {
        let sink: Rc<dyn ObservationSink> = self.sink.clone();
        MonitorContext::new(
            Rc::clone(&self.stack),
            sink,
            self.settings.clone(),
            Rc::clone(&self.clock),
        )
    }

    fn install(&mut self, family: MonitorFamily, host: &Rc<HostApi>) {
        let mut monitor = build_monitor(family, self.context());
        monitor.initialize(host);
        self.monitors.push(monitor);
    }

    /// Installs the standard monitor set on `host`. Network, file and command
    /// monitors are skipped when their toggle is off; the aggressive set is
    /// added when debug mode is on. Loading twice does nothing.
    pub fn load(&mut self, host: Rc<HostApi>) {
        if self.host.is_some() {
            return;
        }
        let settings = self.settings.snapshot();
        for family in MonitorFamily::STANDARD {
            if family.is_gated() && !family.enabled_by(&settings) {
                debug!(target: "extwatch::watcher", monitor = family.as_str(), "monitor disabled by settings");
                continue;
            }
            self.install(family, &host);
        }
        self.host = Some(host);
        if settings.debug_mode {
            self.enable_aggressive_debug();
        }
        info!(target: "extwatch::watcher", monitors = self.monitors.len(), "extension watcher loaded");
    }

    pub fn is_loaded(&self) -> bool {
        self.host.is_some()
    }

    /// Installs the aggressive set. Returns false when it is already
    /// installed or no host is loaded.
    pub fn enable_aggressive_debug(&mut self) -> bool {
        let Some(host) = self.host.clone() else {
            return false;
        };
        if self.is_active(MonitorFamily::AggressiveDebug) {
            return false;
        }
        self.install(MonitorFamily::AggressiveDebug, &host);
        true
    }

    /// Flips debug mode, persists it when a settings directory is known and
    /// turns on the aggressive set when switching on. Returns the new value.
    pub fn toggle_debug_mode(&mut self) -> Result<bool> {
        let enabled = self
            .settings
            .update(|s| {
                s.debug_mode = !s.debug_mode;
                s.debug_mode
            })
            .context("settings are being read")?;
        self.save_settings()?;
        if enabled {
            self.enable_aggressive_debug();
        }
        info!(target: "extwatch::watcher", enabled, "debug mode toggled");
        Ok(enabled)
    }

    /// Restores every installed monitor, newest first.
    pub fn unload(&mut self) {
        if self.monitors.is_empty() && self.host.is_none() {
            return;
        }
        while let Some(mut monitor) = self.monitors.pop() {
            monitor.restore();
        }
        self.host = None;
        info!(target: "extwatch::watcher", "extension watcher unloaded");
    }

    pub fn active_monitors(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|monitor| monitor.name()).collect()
    }

    fn is_active(&self, family: MonitorFamily) -> bool {
        self.monitors.iter().any(|monitor| monitor.family() == family)
    }

    pub fn settings(&self) -> WatcherSettings {
        self.settings.snapshot()
    }

    /// Applies `f` to the live settings. Monitors see the change on their next call.
    pub fn update_settings<R>(&self, f: impl FnOnce(&mut WatcherSettings) -> R) -> Result<R> {
        let out = self.settings.update(f).context("settings are being read")?;
        let capacity = self.settings.borrow().max_log_entries;
        self.log.borrow_mut().set_capacity(capacity);
        Ok(out)
    }

    /// Writes settings to the configured directory. Without one this does nothing.
    pub fn save_settings(&self) -> Result<()> {
        let Some(dir) = self.config_dir.as_deref() else {
            return Ok(());
        };
        settings::save_settings(dir, &self.settings.snapshot())
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn log(&self) -> Ref<'_, ActivityLog> {
        self.log.borrow()
    }

    pub fn logs(&self) -> Vec<Observation> {
        self.log.borrow().to_vec()
    }

    pub fn get_logs_for_plugin(&self, plugin: &str) -> Vec<Observation> {
        self.log.borrow().logs_for_plugin(plugin)
    }

    pub fn get_logs_for_type(&self, category: Category) -> Vec<Observation> {
        self.log.borrow().logs_for_category(category)
    }

    pub fn clear_logs(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn export_logs_json(&self) -> Result<String> {
        self.log.borrow().export_json()
    }

    pub fn export_logs_to(&self, path: &Path) -> Result<()> {
        self.log.borrow().export_to_path(path)
    }

    /// Appends an observation through the same path monitors use.
    pub fn record(&self, draft: ObservationDraft) -> Result<(), InstrumentError> {
        self.sink.append(draft)
    }

    pub fn detect_extension_from_stack(&self, stack: Option<&str>) -> Attribution {
        let debug_mode = self.settings.read(|s| s.debug_mode).unwrap_or(false);
        StackAttributor::with_debug(debug_mode).attribute(stack)
    }

    pub fn interpret_activity(
        &self,
        category: Category,
        extension: &str,
        action: &str,
        detail: &Detail,
    ) -> Interpretation {
        ActivityInterpreter::new().interpret(category, extension, action, detail)
    }
}

impl Drop for ExtensionWatcher {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::FetchRequest;
    use std::cell::RefCell;
    use std::fs;

    #[derive(Default)]
    struct CollectingNotifier {
        messages: RefCell<Vec<String>>,
    }

    impl Notifier for CollectingNotifier {
        fn notify(&self, message: &str) {
            self.messages.borrow_mut().push(message.to_string());
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "extwatch_core_watcher_test_{}_{}",
            name,
            std::process::id()
        ))
    }

    fn draft(origin: Attribution, action: &str) -> ObservationDraft {
        ObservationDraft::new(Category::File, origin, action).with("path", "Daily/2024-01-01.md")
    }

    #[test]
    fn load_respects_toggles_and_unload_restores_everything() {
        let host = HostApi::new(0);
        let settings = WatcherSettings {
            monitor_network_calls: false,
            ..WatcherSettings::default()
        };
        let mut watcher = ExtensionWatcher::for_host(&host, settings);
        watcher.load(Rc::clone(&host));

        let active = watcher.active_monitors();
        assert_eq!(active.len(), 10);
        assert!(!active.contains(&"network"));
        assert!(!active.contains(&"aggressive-debug"));

        host.run_as("web-clipper", || {
            host.network.fetch.call(FetchRequest::get("https://example.com/a"))
        })
        .expect("fetch passes through");
        assert!(watcher.get_logs_for_type(Category::Network).is_empty());

        watcher.unload();
        assert!(watcher.active_monitors().is_empty());
        assert_eq!(host.workspace.events.listener_count("layout-change"), 0);
        assert_eq!(host.timers.pending(), 0);
    }

    #[test]
    fn sink_drops_self_logs_and_reattributes_unknown() {
        let host = HostApi::new(0);
        let watcher = ExtensionWatcher::for_host(&host, WatcherSettings::default());

        watcher
            .record(draft(Attribution::Extension(crate::attribution::SELF_EXTENSION_ID.to_string()), "read"))
            .expect("record self");
        assert!(watcher.logs().is_empty());

        let carried = draft(Attribution::Unknown, "read").with(
            "stack",
            serde_json::json!(["Error", "    at load (plugin:dataview:10:4)"]),
        );
        watcher.record(carried).expect("record carried stack");

        let logs = watcher.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].origin_extension, Attribution::Extension("dataview".to_string()));
        assert!(logs[0]
            .interpretation
            .as_deref()
            .is_some_and(|text| text.contains("dataview")));
        assert_eq!(watcher.get_logs_for_plugin("dataview").len(), 1);
    }

    #[test]
    fn capacity_follows_settings_at_runtime() {
        let host = HostApi::new(0);
        let watcher = ExtensionWatcher::for_host(&host, WatcherSettings::default());
        for i in 0..5 {
            watcher
                .record(draft(Attribution::Core, &format!("read-{i}")))
                .expect("record");
        }
        watcher
            .update_settings(|s| s.max_log_entries = 2)
            .expect("update settings");
        let actions = watcher
            .logs()
            .into_iter()
            .map(|o| o.action)
            .collect::<Vec<_>>();
        assert_eq!(actions, vec!["read-3", "read-4"]);

        watcher.clear_logs();
        assert!(watcher.log().is_empty());
    }

    #[test]
    fn notifications_use_plugin_action_and_type() {
        let host = HostApi::new(0);
        let notifier = Rc::new(CollectingNotifier::default());
        let settings = WatcherSettings {
            show_notifications: true,
            ..WatcherSettings::default()
        };
        let watcher =
            ExtensionWatcher::for_host(&host, settings).with_notifier(notifier.clone());
        watcher
            .record(draft(Attribution::Extension("templater".to_string()), "create"))
            .expect("record");
        assert_eq!(*notifier.messages.borrow(), vec!["templater: create file"]);
    }

    #[test]
    fn toggle_debug_mode_persists_and_enables_aggressive_set_once() {
        let dir = temp_dir("toggle");
        if dir.exists() {
            let _ = fs::remove_dir_all(&dir);
        }
        let host = HostApi::new(0);
        let mut watcher = ExtensionWatcher::load_from_dir(&host, &dir).expect("load watcher");
        watcher.load(Rc::clone(&host));
        assert!(!watcher.active_monitors().contains(&"aggressive-debug"));

        assert!(watcher.toggle_debug_mode().expect("toggle on"));
        assert!(watcher.active_monitors().contains(&"aggressive-debug"));
        assert!(!watcher.enable_aggressive_debug());
        assert!(settings::load_settings(&dir).expect("reload").debug_mode);

        assert!(!watcher.toggle_debug_mode().expect("toggle off"));
        assert!(!settings::load_settings(&dir).expect("reload").debug_mode);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn aggressive_set_needs_a_loaded_host() {
        let host = HostApi::new(0);
        let mut watcher = ExtensionWatcher::for_host(&host, WatcherSettings::default());
        assert!(!watcher.enable_aggressive_debug());
        assert!(!watcher.is_loaded());
        assert_eq!(
            watcher.detect_extension_from_stack(Some("Error\n at fn (plugin:my-plugin:1:2)")),
            Attribution::Extension("my-plugin".to_string())
        );

        let mut detail = Detail::new();
        detail.insert("url".to_string(), Value::from("https://a.b/c"));
        detail.insert("method".to_string(), Value::from("GET"));
        let out = watcher.interpret_activity(Category::Network, "pluginX", "request", &detail);
        assert!(out.interpretation.contains("pluginX - GET"));
        assert!(out.interpretation.contains("a.b/c"));
    }
}
