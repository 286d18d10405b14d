use super::{line_count, word_count, Monitor, MonitorContext, MonitorFamily};
use crate::attribution::Attribution;
use crate::host::{install_wrapper, RestoreSet};
use crate::observation::{Category, ObservationDraft};
use crate::paths;
use crate::surface::{HostApi, VaultFile};
use std::rc::Rc;
use tracing::debug;

const FAMILY: MonitorFamily = MonitorFamily::File;

const BINARY_EXTENSIONS: [&str; 9] = ["png", "jpg", "jpeg", "gif", "svg", "pdf", "zip", "mp3", "mp4"];

pub fn is_binary_extension(extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    BINARY_EXTENSIONS.contains(&extension.as_str())
}

fn file_draft(origin: Attribution, action: &str, file: &VaultFile) -> ObservationDraft {
    ObservationDraft::new(Category::File, origin, action)
        .with("path", file.path.as_str())
        .with("name", file.name.as_str())
        .with("extension", file.extension.as_str())
        .with("size", file.size)
}

/// Vault read, modify, create and delete. Each logs only after the host call succeeds.
pub struct FileMonitor {
    ctx: MonitorContext,
    restores: RestoreSet,
}

impl FileMonitor {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            restores: RestoreSet::new(),
        }
    }

    fn wrap_read(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.vault.read, move |original| {
            Rc::new(move |file: VaultFile| {
                let started = ctx.now_ms();
                let origin = ctx.attribute_caller("vault.read");
                let result = original(file.clone());
                if let Ok(content) = &result {
                    ctx.observe_as(FAMILY, "vault.read", origin, |ctx, origin| {
                        let draft = file_draft(origin, "read", &file)
                            .with("mtime", file.mtime)
                            .with("ctime", file.ctime)
                            .with("contentLength", content.len())
                            .with("readTime", ctx.now_ms().saturating_sub(started))
                            .with("isBinary", is_binary_extension(&file.extension));
                        ctx.record(draft)
                    });
                }
                result
            })
        }));
    }

    fn wrap_modify(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        // The unwrapped read, so fetching the previous content is not itself logged.
        let raw_read = host.vault.read.current();
        self.restores.push(install_wrapper(&host.vault.modify, move |original| {
            Rc::new(move |(file, data): (VaultFile, String)| {
                let started = ctx.now_ms();
                let origin = ctx.attribute_caller("vault.modify");
                let previous_length = raw_read(file.clone()).map(|c| c.len()).unwrap_or(0);
                let data_length = data.len();
                let lines = line_count(&data);
                let words = word_count(&data);
                let has_frontmatter = data.starts_with("---");

                let result = original((file.clone(), data));
                if result.is_ok() {
                    ctx.observe_as(FAMILY, "vault.modify", origin, |ctx, origin| {
                        let diff = data_length as i64 - previous_length as i64;
                        let draft = file_draft(origin, "modify", &file)
                            .with("dataLength", data_length)
                            .with("previousLength", previous_length)
                            .with("contentDiff", diff)
                            .with("lineCount", lines)
                            .with("wordCount", words)
                            .with("modifyTime", ctx.now_ms().saturating_sub(started))
                            .with("hasMarkdown", file.extension == "md")
                            .with("hasFrontmatter", has_frontmatter);
                        ctx.record(draft)
                    });
                }
                result
            })
        }));
    }

    fn wrap_create(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.vault.create, move |original| {
            Rc::new(move |(path, data): (String, String)| {
                let started = ctx.now_ms();
                let origin = ctx.attribute_caller("vault.create");
                let summary = CreateSummary::of(&path, &data);
                let result = original((path, data));
                if result.is_ok() {
                    ctx.observe_as(FAMILY, "vault.create", origin, |ctx, origin| {
                        let has_markdown = summary.extension == "md";
                        let draft = ObservationDraft::new(Category::File, origin, "create")
                            .with("path", summary.path)
                            .with("fileName", summary.file_name)
                            .with("extension", summary.extension)
                            .with("directory", summary.directory)
                            .with("dataLength", summary.data_length)
                            .with("lineCount", summary.lines)
                            .with("wordCount", summary.words)
                            .with("createTime", ctx.now_ms().saturating_sub(started))
                            .with("hasMarkdown", has_markdown)
                            .with("hasFrontmatter", summary.has_frontmatter)
                            .with("isTemplate", summary.is_template);
                        ctx.record(draft)
                    });
                }
                result
            })
        }));
    }

    fn wrap_delete(&mut self, host: &HostApi) {
        let ctx = self.ctx.clone();
        self.restores.push(install_wrapper(&host.vault.delete, move |original| {
            Rc::new(move |file: VaultFile| {
                let started = ctx.now_ms();
                let origin = ctx.attribute_caller("vault.delete");
                let result = original(file.clone());
                if result.is_ok() {
                    ctx.observe_as(FAMILY, "vault.delete", origin, |ctx, origin| {
                        let draft = file_draft(origin, "delete", &file)
                            .with("mtime", file.mtime)
                            .with("ctime", file.ctime)
                            .with("isBinary", is_binary_extension(&file.extension))
                            .with("deleteTime", ctx.now_ms().saturating_sub(started));
                        ctx.record(draft)
                    });
                }
                result
            })
        }));
    }
}

/// What `create` logs, taken before the data moves into the host call.
struct CreateSummary {
    path: String,
    file_name: String,
    extension: String,
    directory: String,
    data_length: usize,
    lines: usize,
    words: usize,
    has_frontmatter: bool,
    is_template: bool,
}

impl CreateSummary {
    fn of(path: &str, data: &str) -> Self {
        Self {
            path: path.to_string(),
            file_name: paths::file_name(path).to_string(),
            extension: paths::file_extension(path),
            directory: paths::parent_dir(path).unwrap_or_default().to_string(),
            data_length: data.len(),
            lines: line_count(data),
            words: word_count(data),
            has_frontmatter: data.starts_with("---"),
            is_template: data.contains("{{") && data.contains("}}"),
        }
    }
}

impl Monitor for FileMonitor {
    fn family(&self) -> MonitorFamily {
        FAMILY
    }

    fn initialize(&mut self, host: &Rc<HostApi>) {
        if self.is_installed() {
            return;
        }
        self.wrap_modify(host);
        self.wrap_read(host);
        self.wrap_create(host);
        self.wrap_delete(host);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CallStack;
    use crate::monitor::testing::{context, VecSink};
    use crate::settings::WatcherSettings;
    use std::cell::RefCell;

    fn installed(settings: WatcherSettings) -> (Rc<HostApi>, FileMonitor, Rc<VecSink>) {
        let host = HostApi::new(500);
        let (ctx, sink) = context(&host, settings);
        let mut monitor = FileMonitor::new(ctx);
        monitor.initialize(&host);
        (host, monitor, sink)
    }

    fn create(host: &HostApi, path: &str, data: &str) -> VaultFile {
        host.run_as("templater", || {
            host.vault
                .create
                .call((path.to_string(), data.to_string()))
        })
        .expect("create file")
    }

    #[test]
    fn create_reports_path_parts_and_template_markers() {
        let (host, _monitor, sink) = installed(WatcherSettings::default());
        create(&host, "Templates/daily.md", "---\ntitle: {{date}}\n---\nbody text");

        let draft = sink.last();
        assert_eq!(draft.action, "create");
        assert_eq!(draft.origin, Attribution::Extension("templater".to_string()));
        assert_eq!(draft.detail_str("fileName"), Some("daily.md"));
        assert_eq!(draft.detail_str("directory"), Some("Templates"));
        assert_eq!(draft.detail.get("isTemplate"), Some(&serde_json::json!(true)));
        assert_eq!(draft.detail.get("hasFrontmatter"), Some(&serde_json::json!(true)));
        assert_eq!(draft.detail.get("lineCount"), Some(&serde_json::json!(4)));
    }

    #[test]
    fn read_keeps_the_callers_attribution_when_the_host_switches_stacks() {
        let host = HostApi::new(500);
        let pending_frame = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&pending_frame);
        let stack = Rc::clone(&host.stack);
        // The host hands control to another extension and returns while it is still running.
        let _switching = install_wrapper(&host.vault.read, move |original| {
            Rc::new(move |file: VaultFile| {
                *slot.borrow_mut() =
                    Some(stack.enter(CallStack::extension_frame("sync-daemon", "onTick")));
                original(file)
            })
        });
        let (ctx, sink) = context(&host, WatcherSettings::default());
        let mut monitor = FileMonitor::new(ctx);
        monitor.initialize(&host);

        let file = create(&host, "notes/a.md", "text");
        host.run_as("reader", || {
            let content = host.vault.read.call(file).expect("read");
            pending_frame.borrow_mut().take();
            assert_eq!(content, "text");
        });

        let draft = sink.last();
        assert_eq!(draft.action, "read");
        assert_eq!(draft.origin, Attribution::Extension("reader".to_string()));
    }

    #[test]
    fn read_logs_content_length_and_binary_flag() {
        let (host, _monitor, sink) = installed(WatcherSettings::default());
        let file = create(&host, "assets/logo.PNG", "binary");
        let content = host
            .run_as("image-viewer", || host.vault.read.call(file))
            .expect("read");
        assert_eq!(content, "binary");

        let draft = sink.last();
        assert_eq!(draft.action, "read");
        assert_eq!(draft.detail.get("contentLength"), Some(&serde_json::json!(6)));
        assert_eq!(draft.detail.get("isBinary"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn failed_calls_are_not_logged_but_errors_pass_through() {
        let (host, _monitor, sink) = installed(WatcherSettings::default());
        let ghost = VaultFile {
            path: "ghost.md".to_string(),
            name: "ghost.md".to_string(),
            extension: "md".to_string(),
            size: 0,
            mtime: 0,
            ctime: 0,
        };
        assert!(host.vault.read.call(ghost.clone()).is_err());
        assert!(host.vault.delete.call(ghost).is_err());
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn modify_compares_against_previous_content_without_a_read_log() {
        let (host, _monitor, sink) = installed(WatcherSettings::default());
        let file = create(&host, "notes/todo.md", "one two");
        host.run_as("tasks", || {
            host.vault
                .modify
                .call((file, "one two three\nfour".to_string()))
        })
        .expect("modify");

        assert_eq!(sink.actions(), vec!["create", "modify"]);
        let draft = sink.last();
        assert_eq!(draft.detail.get("previousLength"), Some(&serde_json::json!(7)));
        assert_eq!(draft.detail.get("contentDiff"), Some(&serde_json::json!(11)));
        assert_eq!(draft.detail.get("wordCount"), Some(&serde_json::json!(4)));
        assert_eq!(draft.detail.get("hasMarkdown"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn delete_logs_file_info_and_restore_unwraps() {
        let (host, mut monitor, sink) = installed(WatcherSettings::default());
        let file = create(&host, "old.md", "");
        host.run_as("cleaner", || host.vault.delete.call(file))
            .expect("delete");
        assert_eq!(sink.last().action, "delete");
        assert_eq!(sink.last().detail_str("path"), Some("old.md"));

        monitor.restore();
        create(&host, "after.md", "x");
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn toggle_off_silences_the_family() {
        let settings = WatcherSettings {
            monitor_file_access: false,
            ..WatcherSettings::default()
        };
        let (host, _monitor, sink) = installed(settings);
        create(&host, "quiet.md", "x");
        assert_eq!(host.vault.file_count(), 1);
        assert_eq!(sink.len(), 0);
    }
}
