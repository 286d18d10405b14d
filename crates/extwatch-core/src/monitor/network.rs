use super::{instrument, string_map, Monitor, MonitorContext, MonitorFamily};
use crate::attribution::Attribution;
use crate::error::InstrumentError;
use crate::host::{install_wrapper, RestoreSet, TimerId, Timers};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{
    BeaconRequest, FetchRequest, HostApi, RequestUrlFn, RequestUrlParams, XhrOpen, XhrSend,
};
use crate::throttle::CLEANUP_INTERVAL_MS;
use std::rc::Rc;
use tracing::{debug, warn};

const FAMILY: MonitorFamily = MonitorFamily::Network;

/// fetch, XHR, beacon and every `requestUrl` entry point. Owns the throttle sweep.
pub struct NetworkMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
    sweep: Option<(Rc<Timers>, TimerId)>,
}

impl NetworkMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
            sweep: None,
        }
    }

    fn wrap_fetch(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.network.fetch, move |original| {
                Rc::new(move |request: FetchRequest| {
                    let started = ctx.now_ms();
                    let pending =
                        instrument("fetch", || Ok(fetch_draft(ctx.detect_extension(), &request)));

                    let result = original(request);

                    if let Some(mut draft) = pending {
                        instrument("fetch", || {
                            if !ctx.family_enabled(FAMILY) {
                                return Ok(());
                            }
                            match &result {
                                Ok(response) => {
                                    draft.action = "fetch-response".to_string();
                                    draft.insert("status", response.status);
                                    draft.insert("statusText", response.status_text.as_str());
                                    draft.insert("ok", response.ok);
                                    draft.insert("responseHeaders", string_map(&response.headers));
                                    draft.insert("responseType", response.response_type.as_str());
                                    draft.insert("responseUrl", response.url.as_str());
                                    draft.insert("redirected", response.redirected);
                                }
                                Err(err) => {
                                    draft.action = "fetch-error".to_string();
                                    draft.insert("error", err.message.as_str());
                                }
                            }
                            draft.insert("responseTime", ctx.now_ms().saturating_sub(started));
                            ctx.record_network(draft).map(|_| ())
                        });
                    }
                    result
                })
            }));
    }

    fn wrap_xhr(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.network.xhr_open, move |original| {
                Rc::new(move |open: XhrOpen| {
                    ctx.observe(FAMILY, "xhr.open", |ctx, origin| {
                        let draft = ObservationDraft::new(Category::Network, origin, "xhr")
                            .with("url", open.url.as_str())
                            .with("method", open.method.as_str());
                        ctx.record_network(draft).map(|_| ())
                    });
                    original(open)
                })
            }));

        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.network.xhr_send, move |original| {
                Rc::new(move |send: XhrSend| {
                    if send.opened && send.body.is_some() {
                        ctx.observe(FAMILY, "xhr.send", |ctx, origin| {
                            let url = if send.response_url.is_empty() {
                                "pending"
                            } else {
                                send.response_url.as_str()
                            };
                            let draft = ObservationDraft::new(Category::Network, origin, "xhr-send")
                                .with("url", url)
                                .with("method", "POST/PUT")
                                .with("hasData", true)
                                .with("dataType", "string");
                            ctx.record_network(draft).map(|_| ())
                        });
                    }
                    original(send)
                })
            }));
    }

    fn wrap_beacon(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores
            .push(install_wrapper(&host.network.send_beacon, move |original| {
                Rc::new(move |beacon: BeaconRequest| {
                    ctx.observe(FAMILY, "sendBeacon", |ctx, origin| {
                        let draft = ObservationDraft::new(Category::Network, origin, "beacon")
                            .with("url", beacon.url.as_str())
                            .with("method", "POST")
                            .with("hasData", beacon.data.is_some());
                        ctx.record_network(draft).map(|_| ())
                    });
                    original(beacon)
                })
            }));
    }

    fn wrap_request_url(&mut self, site: &Rc<RequestUrlFn>) {
        let ctx = self.ctx.clone();
        let intercepted_at = site.label().to_string();
        self.restores.push(install_wrapper(site, move |original| {
            Rc::new(move |params: RequestUrlParams| {
                ctx.observe(FAMILY, &intercepted_at, |ctx, origin| {
                    let draft = ObservationDraft::new(Category::Network, origin, "requestUrl")
                        .with("url", params.url.as_deref().unwrap_or("unknown"))
                        .with("method", params.method.as_deref().unwrap_or("GET"))
                        .with("hasBody", params.body.is_some())
                        .with("contentType", params.header("content-type"))
                        .with("userAgent", params.header("user-agent"))
                        .with("interceptedAt", intercepted_at.as_str());
                    ctx.record_network(draft).map(|_| ())
                });
                original(params)
            })
        }));
    }

    fn schedule_sweep(&mut self, timers: &Rc<Timers>) {
        let every = self
            .ctx
            .throttle()
            .try_borrow()
            .map(|throttle| throttle.config().cleanup_interval_ms)
            .unwrap_or(CLEANUP_INTERVAL_MS);
        let ctx = self.ctx.clone();
        let id = timers.set_interval(
            every,
            Rc::new(move || {
                instrument("throttle-sweep", || {
                    let now = ctx.now_ms();
                    let removed = ctx
                        .throttle()
                        .try_borrow_mut()
                        .map_err(|_| InstrumentError::busy("request throttle"))?
                        .sweep(now);
                    if removed > 0 {
                        debug!(target: "extwatch::monitor", removed, "stale request keys swept");
                    }
                    Ok(())
                });
            }),
        );
        self.sweep = Some((Rc::clone(timers), id));
    }
}

fn fetch_draft(origin: Attribution, request: &FetchRequest) -> ObservationDraft {
    let mut draft = ObservationDraft::new(Category::Network, origin, "fetch")
        .with("url", request.url.as_str())
        .with("method", request.method())
        .with("headers", string_map(&request.headers))
        .with("hasBody", request.body.is_some());
    if let Some(body) = &request.body {
        draft.insert("body", body.len());
        draft.insert("bodyType", "string");
    }
    for (key, value) in [
        ("mode", &request.mode),
        ("credentials", &request.credentials),
        ("cache", &request.cache),
        ("redirect", &request.redirect),
    ] {
        if let Some(value) = value {
            draft.insert(key, value.as_str());
        }
    }
    draft
}

impl Monitor for NetworkMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        self.wrap_fetch(host);
        self.wrap_xhr(host);
        self.wrap_beacon(host);
        for site in &host.network.request_url_sites {
            self.wrap_request_url(site);
        }
        self.schedule_sweep(&host.timers);
        debug!(target: "extwatch::monitor", monitor = self.name(), wrappers = self.restores.len(), "monitor installed");
    }

    fn restore(&mut self) {
        let restored = self.restores.restore_all();
        if let Some((timers, id)) = self.sweep.take() {
            timers.clear(id);
        }
        match self.ctx.throttle().try_borrow_mut() {
            Ok(mut throttle) => throttle.clear(),
            Err(_) => warn!(target: "extwatch::monitor", "request throttle busy during restore"),
        }
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}
