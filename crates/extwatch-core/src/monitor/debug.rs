use super::{string_map, Monitor, MonitorContext, MonitorFamily};
use crate::attribution::Attribution;
use crate::host::{install_wrapper, RestoreSet, TimerCallback};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{Element, HostApi, RequestInit, ResponseInit};
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, info};

const FAMILY: MonitorFamily = MonitorFamily::AggressiveDebug;

/// Extra surfaces watched only in aggressive debug mode: the Request and
/// Response constructors, `Promise.all`, `setTimeout` and element appends.
///
/// Nothing is wrapped until [`Monitor::initialize`]; the coordinator calls it
/// when debug mode is switched on.
pub struct DebugMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl DebugMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }

    fn wrap_request_response(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.constructors.request, move |original| {
                Rc::new(move |init: RequestInit| {
                    // Logged whenever the set is installed, regardless of the flag.
                    ctx.observe_always("Request", |ctx, origin| {
                        let draft =
                            ObservationDraft::new(Category::Network, origin, "request-constructor")
                                .with("url", init.url.as_str())
                                .with("method", init.method.as_deref().unwrap_or("GET"))
                                .with("headers", string_map(&init.headers))
                                .with("mode", init.mode.as_deref());
                        ctx.record(draft)
                    });
                    original(init)
                })
            }));

        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.constructors.response, move |original| {
                Rc::new(move |init: ResponseInit| {
                    ctx.observe(FAMILY, "Response", |ctx, origin| {
                        let draft =
                            ObservationDraft::new(Category::Network, origin, "response-constructor")
                                .with("status", init.status)
                                .with("statusText", init.status_text.as_deref())
                                .with("headers", string_map(&init.headers));
                        ctx.record(draft)
                    });
                    original(init)
                })
            }));
    }

    fn wrap_promise_all(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.scheduler.promise_all, move |original| {
                Rc::new(move |values: Vec<Value>| {
                    ctx.observe(FAMILY, "Promise.all", |ctx, origin| {
                        let stack = ctx.capture_stack().unwrap_or_default();
                        let marker = ctx
                            .settings()
                            .read(|s| s.debug_focus_marker.clone())
                            .unwrap_or_default();
                        if marker.is_empty() || !stack.contains(&marker) {
                            return Ok(());
                        }
                        let draft = ObservationDraft::new(Category::Command, origin, "promise-all")
                            .with("valuesCount", values.len());
                        ctx.record(draft)
                    });
                    original(values)
                })
            }));
    }

    fn wrap_set_timeout(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.scheduler.set_timeout, move |original| {
                Rc::new(move |(callback, delay_ms): (TimerCallback, u64)| {
                    ctx.observe(FAMILY, "setTimeout", |ctx, origin| {
                        if !origin.is_extension() {
                            return Ok(());
                        }
                        let draft = ObservationDraft::new(Category::Command, origin, "set-timeout")
                            .with("timeout", delay_ms);
                        ctx.record(draft)
                    });
                    original((callback, delay_ms))
                })
            }));
    }

    fn wrap_append_child(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.document.append_child, move |original| {
                Rc::new(move |element: Element| {
                    if matches!(element.node_name.as_str(), "SCRIPT" | "IFRAME") {
                        ctx.observe(FAMILY, "appendChild", |ctx, origin| {
                            if origin == Attribution::Core {
                                return Ok(());
                            }
                            let draft =
                                ObservationDraft::new(Category::Command, origin, "append-element")
                                    .with("elementType", element.node_name.as_str())
                                    .with("src", element.src.as_deref());
                            ctx.record(draft)
                        });
                    }
                    original(element)
                })
            }));
    }
}

impl Monitor for DebugMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        self.wrap_request_response(host);
        self.wrap_promise_all(host);
        self.wrap_set_timeout(host);
        self.wrap_append_child(host);
        info!(target: "extwatch::monitor", wrappers = self.restores.len(), "aggressive debug mode enabled");
    }

    fn restore(&mut self) {
        let restored = self.restores.restore_all();
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}
