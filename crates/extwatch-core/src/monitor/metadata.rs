use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{Listener, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{HostApi, MetadataEvent};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Metadata;

pub struct MetadataMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl MetadataMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

impl Monitor for MetadataMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        for name in ["changed", "resolved"] {
            let ctx = self.ctx.clone();
            let listener: Listener<MetadataEvent> = Rc::new(move |event: &MetadataEvent| {
                ctx.observe(FAMILY, "metadataCache", |ctx, origin| {
                    let draft = match event {
                        MetadataEvent::Changed(file) => {
                            ObservationDraft::new(Category::Metadata, origin, "cache-changed")
                                .with("filePath", file.path.as_str())
                                .with("fileName", file.name.as_str())
                        }
                        MetadataEvent::Resolved => {
                            ObservationDraft::new(Category::Metadata, origin, "cache-resolved")
                        }
                    };
                    ctx.record(draft.with("timestamp", ctx.now_ms()))
                });
            });
            self.restores
                .push(host.metadata_cache.on_scoped(name, listener));
        }
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
    use crate::surface::VaultFile;

    #[test]
    fn cache_events_are_logged_with_timestamps() {
        let host = HostApi::new(9_000);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = MetadataMonitor::new(ctx);
        monitor.initialize(&host);

        let file = VaultFile {
            path: "People/Ada.md".to_string(),
            name: "Ada.md".to_string(),
            extension: "md".to_string(),
            size: 10,
            mtime: 1,
            ctime: 1,
        };
        host.metadata_cache.trigger(&MetadataEvent::Changed(file));
        host.metadata_cache.trigger(&MetadataEvent::Resolved);

        assert_eq!(sink.actions(), vec!["cache-changed", "cache-resolved"]);
        let changed = &sink.of(Category::Metadata)[0];
        assert_eq!(changed.detail_str("fileName"), Some("Ada.md"));
        assert_eq!(changed.detail.get("timestamp"), Some(&serde_json::json!(9_000)));

        monitor.restore();
        assert_eq!(host.metadata_cache.listener_count("changed"), 0);
    }
}
