use super::{instrument, Monitor, MonitorContext, MonitorFamily};
use crate::attribution::Attribution;
use crate::host::{install_wrapper, RestoreSet};
use crate::keybind::{KeyEventKind, KeyboardEvent};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{HostApi, KeyListener};
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Keymap;

/// Key listeners registered by extensions.
///
/// The origin is fixed when the listener is registered. Listeners registered
/// by the host or from an unattributable stack are passed through untouched.
/// Listeners wrapped before [`Monitor::restore`] stay in place but go quiet.
pub struct KeymapMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
    active: Rc<Cell<bool>>,
}

impl KeymapMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
            active: Rc::new(Cell::new(false)),
        }
    }
}

fn key_draft(origin: Attribution, event: &KeyboardEvent) -> ObservationDraft {
    ObservationDraft::new(Category::Keymap, origin, "keyboard-event")
        .with("type", event.kind.as_str())
        .with("key", event.key.as_str())
        .with("code", event.code.as_str())
        .with("ctrlKey", event.ctrl)
        .with("altKey", event.alt)
        .with("shiftKey", event.shift)
        .with("metaKey", event.meta)
        .with("target", event.target.as_deref())
}

fn watch_listener(
    ctx: MonitorContext,
    active: Rc<Cell<bool>>,
    origin: Attribution,
    listener: KeyListener,
) -> KeyListener {
    Rc::new(move |event: &KeyboardEvent| {
        if active.get() && ctx.family_enabled(FAMILY) {
            instrument("keyboard-event", || ctx.record(key_draft(origin.clone(), event)));
        }
        listener(event)
    })
}

impl Monitor for KeymapMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        // Fresh flag per install so listeners from an earlier install stay quiet.
        let active = Rc::new(Cell::new(true));
        self.active = Rc::clone(&active);

        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(
            &host.document.add_event_listener,
            move |original| {
                Rc::new(move |(event, listener): (String, KeyListener)| {
                    if KeyEventKind::from_name(&event).is_none() {
                        return original((event, listener));
                    }
                    let origin = instrument("addEventListener", || Ok(ctx.detect_extension()));
                    let listener = match origin {
                        Some(origin @ Attribution::Extension(_)) => {
                            watch_listener(ctx.clone(), Rc::clone(&active), origin, listener)
                        }
                        _ => listener,
                    };
                    original((event, listener))
                })
            },
        ));
        debug!(target: "extwatch::monitor", monitor = self.name(), "monitor installed");
    }

    fn restore(&mut self) {
        self.active.set(false);
        let restored = self.restores.restore_all();
        debug!(target: "extwatch::monitor", monitor = self.name(), restored, "monitor restored");
    }

    fn is_installed(&self) -> bool {
        !self.restores.is_empty()
    }
}
