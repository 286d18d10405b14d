use super::file::is_binary_extension;
use super::{Monitor, MonitorContext, MonitorFamily};
use crate::error::InstrumentError;
use crate::host::{HostEvent, Listener, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{HostApi, LeafView, VaultFile, WorkspaceEvent, WorkspaceState};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Workspace;
const EVENTS: [&str; 5] = [
    "layout-change",
    "active-leaf-change",
    "file-open",
    "resize",
    "css-change",
];

/// Subscribes to workspace lifecycle events and logs each one.
pub struct WorkspaceMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl WorkspaceMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

fn file_value(file: Option<&VaultFile>) -> Value {
    file.and_then(|file| serde_json::to_value(file).ok())
        .unwrap_or(Value::Null)
}

fn describe(
    event: &WorkspaceEvent,
    state: &WorkspaceState,
    now_ms: u64,
    draft: ObservationDraft,
) -> Option<ObservationDraft> {
    let draft = match event {
        WorkspaceEvent::LayoutChange => draft
            .with("timestamp", now_ms)
            .with("activeViewType", state.active_view_type())
            .with("hasLeftSplit", state.has_left_split)
            .with("hasRightSplit", state.has_right_split)
            .with("activeFile", state.active_file().map(|f| f.path.as_str())),
        WorkspaceEvent::ActiveLeafChange(leaf) => leaf_detail(draft, leaf.as_ref()),
        WorkspaceEvent::FileOpen(file) => {
            let file = file.as_ref();
            draft
                .with("filePath", file.map(|f| f.path.as_str()))
                .with("fileName", file.map(|f| f.name.as_str()))
                .with("extension", file.map(|f| f.extension.as_str()))
                .with("size", file.map(|f| f.size))
                .with("mtime", file.map(|f| f.mtime))
                .with("viewType", state.active_view_type())
                .with("isNewFile", file.map_or(true, |f| f.size == 0))
                .with(
                    "isBinary",
                    file.is_some_and(|f| is_binary_extension(&f.extension)),
                )
                .with("hasFrontmatter", false)
        }
        WorkspaceEvent::Resize => draft
            .with("timestamp", now_ms)
            .with("windowWidth", state.window_width)
            .with("windowHeight", state.window_height),
        WorkspaceEvent::CssChange => draft.with("timestamp", now_ms),
        WorkspaceEvent::EditorChange { .. } => return None,
    };
    Some(draft)
}

fn leaf_detail(draft: ObservationDraft, leaf: Option<&LeafView>) -> ObservationDraft {
    let view_type = leaf.map(|l| l.view_type.as_str());
    let file = leaf.and_then(|l| l.file.as_ref());
    let is_view = |name: &str| view_type == Some(name);
    draft
        .with("viewType", view_type)
        .with("file", file_value(file))
        .with("filePath", file.map(|f| f.path.as_str()))
        .with("fileName", file.map(|f| f.name.as_str()))
        .with("hasSelection", leaf.map(|l| l.has_selection))
        .with(
            "cursorPosition",
            leaf.and_then(|l| l.cursor)
                .map(|(line, ch)| serde_json::json!({ "line": line, "ch": ch })),
        )
        .with("isMarkdownView", is_view("markdown"))
        .with("isCanvasView", is_view("canvas"))
        .with("isGraphView", is_view("graph"))
        .with("isSearchView", is_view("search"))
        .with("isFileExplorerView", is_view("file-explorer"))
}

impl Monitor for WorkspaceMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        for name in EVENTS {
            let ctx = self.ctx.clone();
            let state: Rc<RefCell<WorkspaceState>> = Rc::clone(&host.workspace.state);
            let listener: Listener<WorkspaceEvent> = Rc::new(move |event: &WorkspaceEvent| {
                ctx.observe(FAMILY, event.name(), |ctx, origin| {
                    let draft = ObservationDraft::new(Category::Workspace, origin, event.name());
                    let state = state
                        .try_borrow()
                        .map_err(|_| InstrumentError::busy("workspace state"))?;
                    match describe(event, &state, ctx.now_ms(), draft) {
                        Some(draft) => ctx.record(draft),
                        None => Ok(()),
                    }
                });
            });
            self.restores
                .push(host.workspace.events.on_scoped(name, listener));
        }
        debug!(target: "extwatch::monitor", monitor = self.name(), listeners = self.restores.len(), "monitor installed");
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
    use crate::attribution::Attribution;
    use crate::monitor::testing::{context, VecSink};
    use crate::settings::WatcherSettings;

    fn installed() -> (Rc<HostApi>, WorkspaceMonitor, Rc<VecSink>) {
        let host = HostApi::new(42);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = WorkspaceMonitor::new(ctx);
        monitor.initialize(&host);
        (host, monitor, sink)
    }

    fn canvas_file() -> VaultFile {
        VaultFile {
            path: "boards/plan.canvas".to_string(),
            name: "plan.canvas".to_string(),
            extension: "canvas".to_string(),
            size: 0,
            mtime: 7,
            ctime: 7,
        }
    }

    #[test]
    fn layout_and_resize_read_workspace_state() {
        let (host, _monitor, sink) = installed();
        host.workspace.state.borrow_mut().window_width = 800;
        host.run_as("sliding-panes", || {
            host.workspace.events.trigger(&WorkspaceEvent::LayoutChange);
            host.workspace.events.trigger(&WorkspaceEvent::Resize);
        });

        assert_eq!(sink.actions(), vec!["layout-change", "resize"]);
        let drafts = sink.of(Category::Workspace);
        assert_eq!(drafts[0].detail.get("hasLeftSplit"), Some(&serde_json::json!(true)));
        assert_eq!(drafts[0].detail.get("activeFile"), Some(&Value::Null));
        assert_eq!(drafts[1].detail.get("windowWidth"), Some(&serde_json::json!(800)));
        assert_eq!(
            drafts[1].origin,
            Attribution::Extension("sliding-panes".to_string())
        );
    }

    #[test]
    fn leaf_change_flags_the_view_kind() {
        let (host, _monitor, sink) = installed();
        let leaf = LeafView {
            view_type: "canvas".to_string(),
            file: Some(canvas_file()),
            has_selection: false,
            cursor: Some((3, 1)),
        };
        host.workspace
            .events
            .trigger(&WorkspaceEvent::ActiveLeafChange(Some(leaf)));

        let draft = sink.last();
        assert_eq!(draft.detail.get("isCanvasView"), Some(&serde_json::json!(true)));
        assert_eq!(draft.detail.get("isMarkdownView"), Some(&serde_json::json!(false)));
        assert_eq!(draft.detail_str("fileName"), Some("plan.canvas"));
        assert_eq!(
            draft.detail.get("cursorPosition"),
            Some(&serde_json::json!({"line": 3, "ch": 1}))
        );
    }

    #[test]
    fn file_open_marks_empty_files_new() {
        let (host, mut monitor, sink) = installed();
        host.workspace
            .events
            .trigger(&WorkspaceEvent::FileOpen(Some(canvas_file())));
        let draft = sink.last();
        assert_eq!(draft.detail.get("isNewFile"), Some(&serde_json::json!(true)));
        assert_eq!(draft.detail.get("isBinary"), Some(&serde_json::json!(false)));

        monitor.restore();
        assert_eq!(host.workspace.events.trigger(&WorkspaceEvent::CssChange), 0);
        assert_eq!(sink.len(), 1);
    }
}
