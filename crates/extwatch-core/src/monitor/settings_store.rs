use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{install_wrapper, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::HostApi;
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::SettingsStorage;

fn is_settings_key(key: &str) -> bool {
    key.contains("obsidian") || key.contains("plugin")
}

/// Writes to local storage under host or extension keys.
pub struct SettingsStorageMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl SettingsStorageMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

impl Monitor for SettingsStorageMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.storage.set_item, move |original| {
            Rc::new(move |(key, value): (String, String)| {
                if is_settings_key(&key) {
                    ctx.observe(FAMILY, "localStorage.setItem", |ctx, origin| {
                        let draft =
                            ObservationDraft::new(Category::Settings, origin, "localStorage-set")
                                .with("key", key.as_str())
                                .with("valueLength", value.len());
                        ctx.record(draft)
                    });
                }
                original((key, value))
            })
        }));
        debug!(target: "extwatch::monitor", monitor = self.name(), "monitor installed");
    }

    fn restore(&mut self) {
        let restored = self.restores.restore_all();
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::context;
    use crate::settings::WatcherSettings;

    #[test]
    fn only_host_and_plugin_keys_are_logged() {
        let host = HostApi::new(0);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = SettingsStorageMonitor::new(ctx);
        monitor.initialize(&host);

        host.run_as("theme-picker", || {
            host.storage
                .set_item
                .call(("obsidian-theme".to_string(), "dark".to_string()));
            host.storage
                .set_item
                .call(("recent-searches".to_string(), "[]".to_string()));
        });

        assert_eq!(sink.actions(), vec!["localStorage-set"]);
        assert_eq!(sink.last().detail.get("valueLength"), Some(&serde_json::json!(4)));
        assert_eq!(host.storage.get_item("recent-searches").as_deref(), Some("[]"));

        monitor.restore();
        host.storage
            .set_item
            .call(("plugin-state".to_string(), "{}".to_string()));
        assert_eq!(sink.len(), 1);
    }
}
