use super::{word_count, Monitor, MonitorContext, MonitorFamily};
use crate::attribution::Attribution;
use crate::host::{Listener, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::surface::{EditorChangeInfo, EditorSnapshot, HostApi, WorkspaceEvent};
use serde_json::{json, Value};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::Editor;

/// Content statistics for every editor change, plus a text-modification
/// record when the change carries an origin.
pub struct EditorMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl EditorMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }
}

fn change_draft(origin: Attribution, editor: &EditorSnapshot, now_ms: u64) -> ObservationDraft {
    let content = editor.content.as_str();
    ObservationDraft::new(Category::Editor, origin, "editor-change")
        .with("lineCount", editor.line_count())
        .with("hasSelection", !editor.selection.is_empty())
        .with("selectionLength", editor.selection.len())
        .with("cursorLine", editor.cursor_line)
        .with("cursorCh", editor.cursor_ch)
        .with("contentLength", content.len())
        .with("wordCount", word_count(content))
        .with(
            "hasMarkdown",
            content.contains('#') || content.contains('*') || content.contains('`'),
        )
        .with("hasLinks", content.contains("[[") || content.contains("]("))
        .with("hasTags", content.contains('#'))
        .with("hasFrontmatter", content.starts_with("---"))
        .with("isEmpty", content.trim().is_empty())
        .with("lastModified", now_ms)
}

fn position(pos: Option<(u32, u32)>) -> Value {
    pos.map(|(line, ch)| json!({ "line": line, "ch": ch }))
        .unwrap_or(Value::Null)
}

fn modification_draft(
    origin: Attribution,
    editor: &EditorSnapshot,
    info: &EditorChangeInfo,
    source: &str,
) -> ObservationDraft {
    ObservationDraft::new(Category::Editor, origin, "text-modification")
        .with("origin", source)
        .with("from", position(info.from))
        .with("to", position(info.to))
        .with("text", info.text.clone())
        .with("removed", info.removed.clone())
        .with("lineCount", editor.line_count())
        .with("contentLength", editor.content.len())
}

impl Monitor for EditorMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        let ctx = self.ctx.clone();
        let listener: Listener<WorkspaceEvent> = Rc::new(move |event: &WorkspaceEvent| {
            let WorkspaceEvent::EditorChange { editor, info } = event else {
                return;
            };
            ctx.observe(FAMILY, "editor-change", |ctx, origin| {
                let modification = info
                    .as_ref()
                    .and_then(|info| info.origin.as_deref().map(|source| (info, source)))
                    .map(|(info, source)| modification_draft(origin.clone(), editor, info, source));
                ctx.record(change_draft(origin, editor, ctx.now_ms()))?;
                match modification {
                    Some(draft) => ctx.record(draft),
                    None => Ok(()),
                }
            });
        });
        self.restores
            .push(host.workspace.events.on_scoped("editor-change", listener));
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
    fn editor_change_reports_content_shape() {
        let host = HostApi::new(0);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = EditorMonitor::new(ctx);
        monitor.initialize(&host);

        let editor = EditorSnapshot {
            content: "---\ntags: x\n---\n# Title\nsee [[Other]]".to_string(),
            cursor_line: 4,
            cursor_ch: 2,
            selection: "Title".to_string(),
        };
        host.run_as("linter", || {
            host.workspace.events.trigger(&WorkspaceEvent::EditorChange {
                editor: editor.clone(),
                info: None,
            })
        });

        let draft = sink.last();
        assert_eq!(draft.action, "editor-change");
        assert_eq!(draft.detail.get("lineCount"), Some(&json!(5)));
        assert_eq!(draft.detail.get("selectionLength"), Some(&json!(5)));
        assert_eq!(draft.detail.get("hasLinks"), Some(&json!(true)));
        assert_eq!(draft.detail.get("hasFrontmatter"), Some(&json!(true)));
        assert_eq!(draft.detail.get("isEmpty"), Some(&json!(false)));
    }

    #[test]
    fn origin_adds_a_text_modification_record() {
        let host = HostApi::new(0);
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = EditorMonitor::new(ctx);
        monitor.initialize(&host);

        let info = EditorChangeInfo {
            origin: Some("+input".to_string()),
            from: Some((0, 0)),
            to: Some((0, 0)),
            text: vec!["a".to_string()],
            removed: Vec::new(),
        };
        host.workspace.events.trigger(&WorkspaceEvent::EditorChange {
            editor: EditorSnapshot::default(),
            info: Some(info),
        });
        host.workspace.events.trigger(&WorkspaceEvent::EditorChange {
            editor: EditorSnapshot::default(),
            info: Some(EditorChangeInfo::default()),
        });

        assert_eq!(
            sink.actions(),
            vec!["editor-change", "text-modification", "editor-change"]
        );
        let modification = &sink.of(Category::Editor)[1];
        assert_eq!(modification.detail_str("origin"), Some("+input"));
        assert_eq!(modification.detail.get("from"), Some(&json!({"line": 0, "ch": 0})));
        assert_eq!(modification.detail.get("text"), Some(&json!(["a"])));
    }
}
