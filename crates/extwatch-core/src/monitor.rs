//! Monitor family and the shared interception plumbing.
//!
//! A monitor owns the restore handles of the wrappers it installed on a
//! [`HostApi`]. Every wrapper funnels its bookkeeping through [`instrument`],
//! so a fault in attribution, throttling or the sink is reported on the
//! diagnostic channel and the host call still runs with its original
//! arguments.

pub mod advanced;
pub mod canvas;
pub mod command;
pub mod debug;
pub mod editor;
pub mod file;
pub mod keymap;
pub mod metadata;
pub mod modal;
pub mod network;
pub mod settings_store;
pub mod workspace;

use crate::attribution::{Attribution, StackAttributor, StackCapture};
use crate::clock::Clock;
use crate::error::{InstrumentError, InstrumentErrorCode};
use crate::observation::ObservationDraft;
use crate::settings::{SharedSettings, WatcherSettings};
use crate::surface::HostApi;
use crate::throttle::{request_key, RequestThrottle, ThrottleDecision};
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::warn;

/// Where monitors deliver what they saw.
pub trait ObservationSink {
    fn append(&self, draft: ObservationDraft) -> Result<(), InstrumentError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MonitorFamily {
    Network,
    File,
    Command,
    Advanced,
    Workspace,
    Metadata,
    Keymap,
    Modal,
    Editor,
    Canvas,
    SettingsStorage,
    AggressiveDebug,
}

impl MonitorFamily {
    /// Load order used by the coordinator. The aggressive set is not part of it.
    pub const STANDARD: [MonitorFamily; 11] = [
        MonitorFamily::Network,
        MonitorFamily::File,
        MonitorFamily::Command,
        MonitorFamily::Advanced,
        MonitorFamily::Workspace,
        MonitorFamily::Metadata,
        MonitorFamily::Keymap,
        MonitorFamily::Modal,
        MonitorFamily::Editor,
        MonitorFamily::Canvas,
        MonitorFamily::SettingsStorage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::File => "file",
            Self::Command => "command",
            Self::Advanced => "advanced",
            Self::Workspace => "workspace",
            Self::Metadata => "metadata",
            Self::Keymap => "keymap",
            Self::Modal => "modal",
            Self::Editor => "editor",
            Self::Canvas => "canvas",
            Self::SettingsStorage => "settings-storage",
            Self::AggressiveDebug => "aggressive-debug",
        }
    }

    /// Whether the settings currently allow this family to emit.
    pub fn enabled_by(self, settings: &WatcherSettings) -> bool {
        match self {
            Self::Network => settings.monitor_network_calls,
            Self::File => settings.monitor_file_access,
            Self::Command => settings.monitor_commands,
            Self::AggressiveDebug => settings.debug_mode,
            _ => true,
        }
    }

    /// Families that have a user-facing toggle.
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Network | Self::File | Self::Command)
    }
}

impl std::fmt::Display for MonitorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Monitor {
    fn family(&self) -> MonitorFamily;

    fn name(&self) -> &'static str {
        self.family().as_str()
    }

    /// Installs this monitor's wrappers. A second call while installed does nothing.
    fn initialize(&mut self, host: &Rc<HostApi>);

    /// Puts every original back and cancels owned timers.
    fn restore(&mut self);

    fn is_installed(&self) -> bool;
}

/// Everything a wrapper needs, cheap to clone into closures.
#[derive(Clone)]
pub struct MonitorContext {
    stack: Rc<dyn StackCapture>,
    sink: Rc<dyn ObservationSink>,
    settings: SharedSettings,
    clock: Rc<dyn Clock>,
    throttle: Rc<RefCell<RequestThrottle>>,
}

impl MonitorContext {
    pub fn new(
        stack: Rc<dyn StackCapture>,
        sink: Rc<dyn ObservationSink>,
        settings: SharedSettings,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            stack,
            sink,
            settings,
            clock,
            throttle: Rc::new(RefCell::new(RequestThrottle::new())),
        }
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn throttle(&self) -> &Rc<RefCell<RequestThrottle>> {
        &self.throttle
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn capture_stack(&self) -> Option<String> {
        self.stack.capture()
    }

    pub fn debug_mode(&self) -> bool {
        self.settings.read(|s| s.debug_mode).unwrap_or(false)
    }

    /// Attributes whatever code is calling right now.
    pub fn detect_extension(&self) -> Attribution {
        self.attribute(self.capture_stack().as_deref())
    }

    pub fn attribute(&self, stack: Option<&str>) -> Attribution {
        StackAttributor::with_debug(self.debug_mode()).attribute(stack)
    }

    /// A settings object that cannot be read counts as the family being off.
    pub fn family_enabled(&self, family: MonitorFamily) -> bool {
        self.settings
            .read(|s| family.enabled_by(s))
            .unwrap_or(false)
    }

    pub fn record(&self, draft: ObservationDraft) -> Result<(), InstrumentError> {
        self.sink.append(draft)
    }

    /// Records a network-class observation through the request throttle.
    ///
    /// The throttle key is built from the draft's origin and its `method` and
    /// `url` detail fields. Returns whether anything reached the sink.
    pub fn record_network(&self, mut draft: ObservationDraft) -> Result<bool, InstrumentError> {
        let method = draft.detail_str("method").unwrap_or("GET").to_string();
        let url = draft.detail_str("url").unwrap_or("unknown").to_string();
        let key = request_key(draft.origin.as_str(), &method, &url);

        let decision = self
            .throttle
            .try_borrow_mut()
            .map_err(|_| InstrumentError::busy("request throttle"))?
            .check(&key, self.now_ms());

        match decision {
            ThrottleDecision::Suppress => return Ok(false),
            ThrottleDecision::Record => {}
            ThrottleDecision::RecordGrouped(grouping) => {
                draft.action.push_str("-grouped");
                draft.insert("grouped", grouping.is_grouped);
                draft.insert("repeatCount", grouping.repeat_count);
                draft.insert("timeSpan", grouping.time_span_ms);
            }
        }
        self.record(draft)?;
        Ok(true)
    }

    /// Attributes the current call and lets `emit` build and record an
    /// observation, all inside the guard. Skipped when `family` is off.
    pub fn observe(
        &self,
        family: MonitorFamily,
        surface: &str,
        emit: impl FnOnce(&Self, Attribution) -> Result<(), InstrumentError>,
    ) {
        if self.family_enabled(family) {
            self.observe_always(surface, emit);
        }
    }

    /// [`Self::observe`] without a family toggle.
    pub fn observe_always(
        &self,
        surface: &str,
        emit: impl FnOnce(&Self, Attribution) -> Result<(), InstrumentError>,
    ) {
        instrument(surface, || {
            let origin = self.detect_extension();
            emit(self, origin)
        });
    }

    /// Attributes the caller ahead of a host call, for wrappers that log the
    /// call's outcome with [`Self::observe_as`].
    pub fn attribute_caller(&self, surface: &str) -> Option<Attribution> {
        instrument(surface, || Ok(self.detect_extension()))
    }

    /// [`Self::observe`] with an origin taken before the host call ran.
    pub fn observe_as(
        &self,
        family: MonitorFamily,
        surface: &str,
        origin: Option<Attribution>,
        emit: impl FnOnce(&Self, Attribution) -> Result<(), InstrumentError>,
    ) {
        let Some(origin) = origin else {
            return;
        };
        if self.family_enabled(family) {
            instrument(surface, || emit(self, origin));
        }
    }
}

/// Runs instrumentation logic so that neither an error nor a panic escapes.
pub fn instrument<T>(
    surface: &str,
    f: impl FnOnce() -> Result<T, InstrumentError>,
) -> Option<T> {
    let err = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(err)) => err,
        Err(payload) => {
            InstrumentError::new(InstrumentErrorCode::Panicked, panic_message(payload.as_ref()))
        }
    };
    warn!(
        target: "extwatch::monitor",
        surface,
        code = err.code.as_tag(),
        "instrumentation fault: {err}"
    );
    None
}

pub(crate) fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect(),
    )
}

pub(crate) fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink and host wiring shared by the monitor tests.

    use super::*;
    use crate::observation::Category;

    #[derive(Default)]
    pub struct VecSink {
        pub drafts: RefCell<Vec<ObservationDraft>>,
    }

    impl VecSink {
        pub fn actions(&self) -> Vec<String> {
            self.drafts
                .borrow()
                .iter()
                .map(|draft| draft.action.clone())
                .collect()
        }

        pub fn last(&self) -> ObservationDraft {
            self.drafts
                .borrow()
                .last()
                .cloned()
                .expect("at least one observation")
        }

        pub fn of(&self, category: Category) -> Vec<ObservationDraft> {
            self.drafts
                .borrow()
                .iter()
                .filter(|draft| draft.category == category)
                .cloned()
                .collect()
        }

        pub fn len(&self) -> usize {
            self.drafts.borrow().len()
        }
    }

    impl ObservationSink for VecSink {
        fn append(&self, draft: ObservationDraft) -> Result<(), InstrumentError> {
            self.drafts.borrow_mut().push(draft);
            Ok(())
        }
    }

    pub fn context(host: &Rc<HostApi>, settings: WatcherSettings) -> (MonitorContext, Rc<VecSink>) {
        let sink = Rc::new(VecSink::default());
        let ctx = MonitorContext::new(
            host.stack_capture(),
            sink.clone(),
            SharedSettings::new(settings),
            host.clock_handle(),
        );
        (ctx, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::observation::Category;

    struct FailingSink;

    impl ObservationSink for FailingSink {
        fn append(&self, _draft: ObservationDraft) -> Result<(), InstrumentError> {
            Err(InstrumentError::new(
                InstrumentErrorCode::SinkUnavailable,
                "closed",
            ))
        }
    }

    #[test]
    fn instrument_swallows_errors_and_panics() {
        assert_eq!(instrument("ok", || Ok(7)), Some(7));
        assert_eq!(
            instrument::<()>("err", || Err(InstrumentError::busy("log"))),
            None
        );
        assert_eq!(instrument::<()>("panic", || panic!("boom")), None);
    }

    #[test]
    fn family_toggles_follow_settings() {
        let settings = WatcherSettings {
            monitor_network_calls: false,
            debug_mode: true,
            ..WatcherSettings::default()
        };
        assert!(!MonitorFamily::Network.enabled_by(&settings));
        assert!(MonitorFamily::File.enabled_by(&settings));
        assert!(MonitorFamily::Modal.enabled_by(&settings));
        assert!(MonitorFamily::AggressiveDebug.enabled_by(&settings));
        assert!(MonitorFamily::Command.is_gated());
        assert!(!MonitorFamily::Canvas.is_gated());
        assert_eq!(MonitorFamily::STANDARD[0], MonitorFamily::Network);
    }

    #[test]
    fn observe_attributes_from_the_host_stack() {
        let host = HostApi::new(0);
        let (ctx, sink) = context(&host, WatcherSettings::default());

        host.run_as("calendar", || {
            ctx.observe(MonitorFamily::Modal, "test", |ctx, origin| {
                ctx.record(ObservationDraft::new(Category::Modal, origin, "ping"))
            });
        });

        let draft = sink.last();
        assert_eq!(draft.origin, Attribution::Extension("calendar".to_string()));
        assert_eq!(draft.action, "ping");
    }

    #[test]
    fn observe_skips_disabled_families() {
        let host = HostApi::new(0);
        let settings = WatcherSettings {
            monitor_file_access: false,
            ..WatcherSettings::default()
        };
        let (ctx, sink) = context(&host, settings);
        ctx.observe(MonitorFamily::File, "test", |ctx, origin| {
            ctx.record(ObservationDraft::new(Category::File, origin, "read"))
        });
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn network_records_are_throttled_and_grouped() {
        let host = HostApi::new(1_000);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let draft = ObservationDraft::new(
            Category::Network,
            Attribution::Extension("poller".to_string()),
            "fetch-response",
        )
        .with("url", "https://api.test/poll")
        .with("method", "GET");

        let mut recorded = Vec::new();
        for _ in 0..5 {
            recorded.push(ctx.record_network(draft.clone()).expect("record"));
            host.clock.advance(100);
        }
        assert_eq!(recorded, vec![true, true, true, true, false]);

        let grouped = sink.last();
        assert_eq!(grouped.action, "fetch-response-grouped");
        assert_eq!(grouped.detail.get("repeatCount"), Some(&serde_json::json!(4)));
        assert_eq!(grouped.detail.get("timeSpan"), Some(&serde_json::json!(300)));
    }

    #[test]
    fn sink_failure_surfaces_as_error_to_the_guard() {
        let host = HostApi::new(0);
        let ctx = MonitorContext::new(
            host.stack_capture(),
            Rc::new(FailingSink),
            SharedSettings::new(WatcherSettings::default()),
            host.clock_handle(),
        );
        let draft = ObservationDraft::new(Category::Settings, Attribution::Unknown, "x");
        let err = ctx.record(draft).expect_err("sink closed");
        assert_eq!(err.code, InstrumentErrorCode::SinkUnavailable);
    }
}
