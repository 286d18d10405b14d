use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{install_wrapper, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{EventSourceInit, HostApi, WebSocketInit, WorkerInit};
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Advanced;

/// Worker, EventSource and WebSocket constructors. Logged before construction.
pub struct AdvancedApiMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl AdvancedApiMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

impl Monitor for AdvancedApiMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        let constructors = &host.constructors;

        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&constructors.worker, move |original| {
            Rc::new(move |init: WorkerInit| {
                ctx.observe(FAMILY, "Worker", |ctx, origin| {
                    let draft = ObservationDraft::new(Category::Command, origin, "web-worker")
                        .with("scriptURL", init.script_url.as_str())
                        .with("options", init.options.clone().unwrap_or(Value::Null));
                    ctx.record(draft)
                });
                original(init)
            })
        }));

        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&constructors.event_source, move |original| {
                Rc::new(move |init: EventSourceInit| {
                    ctx.observe(FAMILY, "EventSource", |ctx, origin| {
                        let draft = ObservationDraft::new(Category::Network, origin, "event-source")
                            .with("url", init.url.as_str())
                            .with("withCredentials", init.with_credentials);
                        ctx.record(draft)
                    });
                    original(init)
                })
            }));

        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&constructors.websocket, move |original| {
                Rc::new(move |init: WebSocketInit| {
                    ctx.observe(FAMILY, "WebSocket", |ctx, origin| {
                        let protocols = init
                            .protocols
                            .iter()
                            .map(|p| Value::from(p.as_str()))
                            .collect::<Vec<_>>();
                        let draft = ObservationDraft::new(Category::Network, origin, "websocket")
                            .with("url", init.url.as_str())
                            .with("protocols", protocols);
                        ctx.record(draft)
                    });
                    original(init)
                })
            }));

        debug!(target: "extwatch::monitor", monitor = self.name(), wrappers = self.restores.len(), "monitor installed");
    }

    fn restore(&mut self) {
        let restored = self.restores.restore_all();
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}
