use super::{Monitor, MonitorContext, MonitorFamily};
use crate::host::{install_wrapper, RestoreHandle, RestoreSet};
use crate::keybind::{KeyChord, KeyboardEvent};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{HostApi, KeyListener, WindowOpen};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Command;
const PALETTE_CHORDS: [&str; 2] = ["Ctrl+p", "Meta+p"];

/// `core` for `app:` commands, otherwise the id's namespace before the first `:`.
pub fn command_category(command_id: &str) -> &str {
    if command_id.starts_with("app:") {
        return "core";
    }
    match command_id.split_once(':') {
        Some((namespace, _)) if !namespace.is_empty() => namespace,
        _ => "unknown",
    }
}

/// Command execution, `window.open`, and a palette shortcut listener.
pub struct CommandMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl CommandMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }

    fn wrap_execute(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        let workspace = Rc::clone(&host.workspace.state);
        self.restores.push(install_wrapper(
            &host.commands.execute_command_by_id,
            move |original| {
                Rc::new(move |command_id: String| {
                    let started = ctx.now_ms();
                    let (active_file, view_type) = {
                        let state = workspace.borrow();
                        (
                            state.active_file().map(|file| file.path.clone()),
                            state.active_view_type().map(str::to_string),
                        )
                    };
                    let origin = ctx.attribute_caller("executeCommandById");
                    let executed = original(command_id.clone());

                    ctx.observe_as(FAMILY, "executeCommandById", origin, |ctx, origin| {
                        let is_core = command_id.starts_with("app:");
                        let draft = ObservationDraft::new(Category::Command, origin, "execute")
                            .with("commandId", command_id.as_str())
                            .with("executionTime", ctx.now_ms().saturating_sub(started))
                            .with("hasActiveFile", active_file.is_some())
                            .with("activeFile", active_file)
                            .with("isMarkdownView", view_type.as_deref() == Some("markdown"))
                            .with("activeViewType", view_type)
                            .with("commandCategory", command_category(&command_id))
                            .with("isCoreCommand", is_core)
                            .with("isPluginCommand", !is_core);
                        ctx.record(draft)
                    });
                    executed
                })
            },
        ));
    }

    fn wrap_window_open(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.commands.window_open, move |original| {
            Rc::new(move |request: WindowOpen| {
                ctx.observe(FAMILY, "window.open", |ctx, origin| {
                    let draft = ObservationDraft::new(Category::Command, origin, "window.open")
                        .with("url", request.url.as_str())
                        .with("target", request.target.as_deref())
                        .with("features", request.features.as_deref());
                    ctx.record(draft)
                });
                original(request)
            })
        }));
    }

    fn listen_for_palette(&mut self, host: &Rc<HostApi>) {
        let ctx = self.ctx.clone();
        let chords = PALETTE_CHORDS
            .iter()
            .filter_map(|chord| KeyChord::parse(chord))
            .collect::<Vec<_>>();
        let listener: KeyListener = Rc::new(move |event: &KeyboardEvent| {
            if !chords.iter().any(|chord| chord.is_pressed_by(event)) {
                return;
            }
            ctx.observe(FAMILY, "palette", |ctx, origin| {
                let draft = ObservationDraft::new(Category::Command, origin, "palette-open")
                    .with("timestamp", ctx.now_ms())
                    .with("key", event.key.as_str())
                    .with("ctrlKey", event.ctrl)
                    .with("metaKey", event.meta);
                ctx.record(draft)
            });
        });

        let id = host
            .document
            .add_event_listener
            .call(("keydown".to_string(), listener));
        let host = Rc::clone(host);
        self.restores.push(RestoreHandle::new("palette-listener", move || {
            host.document.remove_event_listener(id);
        }));
    }
}

impl Monitor for CommandMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        self.wrap_execute(host);
        self.listen_for_palette(host);
        self.wrap_window_open(host);
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
