use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{install_wrapper, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{HostApi, VaultFile};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Canvas;

/// `.canvas` creation and reads, logged before the vault call.
pub struct CanvasMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl CanvasMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

impl Monitor for CanvasMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.vault.create, move |original| {
            Rc::new(move |(path, data): (String, String)| {
                if path.ends_with(".canvas") {
                    ctx.observe(FAMILY, "vault.create", |ctx, origin| {
                        let draft =
                            ObservationDraft::new(Category::Canvas, origin, "canvas-file-created")
                                .with("filePath", path.as_str())
                                .with("dataLength", data.len());
                        ctx.record(draft)
                    });
                }
                original((path, data))
            })
        }));

        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.vault.read, move |original| {
            Rc::new(move |file: VaultFile| {
                if file.extension == "canvas" {
                    ctx.observe(FAMILY, "vault.read", |ctx, origin| {
                        let draft =
                            ObservationDraft::new(Category::Canvas, origin, "canvas-file-read")
                                .with("filePath", file.path.as_str())
                                .with("fileName", file.name.as_str());
                        ctx.record(draft)
                    });
                }
                original(file)
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
