use anyhow::{bail, Context as _, Result};
use extwatch_core::attribution::StackAttributor;
use extwatch_core::keybind::KeyboardEvent;
use extwatch_core::settings::{load_settings, WatcherSettings};
use extwatch_core::surface::{
    BeaconRequest, FetchRequest, HostApi, MetadataEvent, RequestUrlParams, WebSocketInit,
    WindowOpen, WorkerInit, WorkspaceEvent, XhrOpen,
};
use extwatch_core::throttle::{request_key, RequestThrottle, ThrottleDecision};
use extwatch_core::ExtensionWatcher;
use serde::Deserialize;
use std::fs;
use std::io::Read as _;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "attribute" => cmd_attribute(args.collect()),
        "replay" => cmd_replay(args.collect()),
        "perf" => cmd_perf(args.collect()),
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            bail!("unknown xtask command: {other}");
        }
    }
}

fn print_help() {
    eprintln!(
        r#"xtask (extwatch)

Commands:
  attribute   Print the extension a captured stack trace belongs to
  replay      Replay recorded host calls through a watched simulated host
  perf        Attribution and throttle throughput, plus process memory

Examples:
  cargo run -p xtask -- attribute --stack trace.txt
  pbpaste | cargo run -p xtask -- attribute --stack - --debug
  cargo run -p xtask -- replay --path session.jsonl --export activity.json
  cargo run -p xtask -- perf --iterations 20000

Diagnostics go to stderr; set RUST_LOG=extwatch=debug for monitor install/restore events.
"#
    );
}

// ---- attribute -------------------------------------------------------------

struct AttributeArgs {
    stack: String,
    debug: bool,
}

fn parse_attribute_args(args: Vec<String>) -> Result<AttributeArgs> {
    let mut stack: Option<String> = None;
    let mut debug = false;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stack" => stack = Some(it.next().context("--stack requires a value")?),
            "--debug" => debug = true,
            other => bail!("unknown attribute arg: {other}"),
        }
    }
    Ok(AttributeArgs {
        stack: stack.context("--stack is required (a file path or - for stdin)")?,
        debug,
    })
}

fn cmd_attribute(args: Vec<String>) -> Result<()> {
    let args = parse_attribute_args(args)?;
    let trace = if args.stack == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("read stack from stdin")?;
        raw
    } else {
        fs::read_to_string(&args.stack)
            .with_context(|| format!("read stack file: {}", args.stack))?
    };

    let attribution = StackAttributor::with_debug(args.debug).attribute(Some(&trace));
    println!("{attribution}");
    Ok(())
}

// ---- replay ----------------------------------------------------------------

/// One recorded host call. `ext` names the extension the call came from;
/// `core` replays it from the host bundle, absent replays it with no frame.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    ext: Option<String>,
    #[serde(flatten)]
    call: ReplayCall,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
enum ReplayCall {
    Fetch {
        url: String,
        #[serde(default)]
        method: Option<String>,
    },
    Xhr {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    Beacon {
        url: String,
    },
    RequestUrl {
        url: String,
        #[serde(default)]
        method: Option<String>,
    },
    VaultCreate {
        path: String,
        #[serde(default)]
        data: String,
    },
    VaultRead {
        path: String,
    },
    VaultModify {
        path: String,
        data: String,
    },
    VaultDelete {
        path: String,
    },
    Command {
        id: String,
    },
    WindowOpen {
        url: String,
    },
    Key {
        key: String,
        #[serde(default)]
        ctrl: bool,
        #[serde(default)]
        meta: bool,
    },
    Storage {
        key: String,
        value: String,
    },
    Worker {
        url: String,
    },
    Websocket {
        url: String,
    },
    Workspace {
        event: String,
    },
    MetadataResolved,
    Advance {
        ms: u64,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

struct ReplayArgs {
    path: PathBuf,
    export: Option<PathBuf>,
    settings_dir: Option<PathBuf>,
}

fn parse_replay_args(args: Vec<String>) -> Result<ReplayArgs> {
    let mut path: Option<PathBuf> = None;
    let mut export: Option<PathBuf> = None;
    let mut settings_dir: Option<PathBuf> = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--path" => path = Some(PathBuf::from(it.next().context("--path requires a value")?)),
            "--export" => {
                export = Some(PathBuf::from(
                    it.next().context("--export requires a value")?,
                ))
            }
            "--settings" => {
                settings_dir = Some(PathBuf::from(
                    it.next().context("--settings requires a value")?,
                ))
            }
            other => bail!("unknown replay arg: {other}"),
        }
    }
    Ok(ReplayArgs {
        path: path.context("--path is required")?,
        export,
        settings_dir,
    })
}

fn cmd_replay(args: Vec<String>) -> Result<()> {
    let args = parse_replay_args(args)?;
    let raw = fs::read_to_string(&args.path)
        .with_context(|| format!("read replay file: {}", args.path.display()))?;

    let settings = match &args.settings_dir {
        Some(dir) => load_settings(dir)?,
        None => WatcherSettings {
            log_to_console: false,
            ..WatcherSettings::default()
        },
    };

    let host = HostApi::new(0);
    let mut watcher = ExtensionWatcher::for_host(&host, settings);
    watcher.load(Rc::clone(&host));

    let mut replayed = 0usize;
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry: ReplayLine = serde_json::from_str(line)
            .with_context(|| format!("parse replay line {}", index + 1))?;
        debug!(target: "xtask::replay", line = index + 1, call = ?entry.call, "replaying");
        match entry.ext.as_deref() {
            Some("core") => host.run_as_core(|| replay_call(&host, entry.call)),
            Some(ext) => host.run_as(ext, || replay_call(&host, entry.call)),
            None => replay_call(&host, entry.call),
        }
        replayed += 1;
    }

    for observation in watcher.logs() {
        println!(
            "{} [{}] {} {}: {}",
            observation.timestamp.format("%H:%M:%S%.3f"),
            observation.category,
            observation.origin_extension,
            observation.action,
            observation.interpretation.as_deref().unwrap_or_default()
        );
    }
    println!(
        "replayed {replayed} calls, {} observations, {} extensions",
        watcher.log().len(),
        watcher.log().unique_plugins().len()
    );

    if let Some(export) = &args.export {
        watcher.export_logs_to(export)?;
        println!("exported: {}", export.display());
    }
    watcher.unload();
    Ok(())
}

/// Drives one host surface. Host failures are replayed faithfully and only reported.
fn replay_call(host: &HostApi, call: ReplayCall) {
    match call {
        ReplayCall::Fetch { url, method } => {
            let request = FetchRequest {
                method,
                ..FetchRequest::get(&url)
            };
            if let Err(err) = host.network.fetch.call(request) {
                warn!(target: "xtask::replay", url, "fetch failed: {err}");
            }
        }
        ReplayCall::Xhr { url, method } => host.network.xhr_open.call(XhrOpen { method, url }),
        ReplayCall::Beacon { url } => {
            host.network.send_beacon.call(BeaconRequest { url, data: None });
        }
        ReplayCall::RequestUrl { url, method } => {
            let params = RequestUrlParams {
                url: Some(url),
                method,
                ..RequestUrlParams::default()
            };
            let Some(request_url) = host.network.request_url() else {
                return;
            };
            if let Err(err) = request_url.call(params) {
                warn!(target: "xtask::replay", "requestUrl failed: {err}");
            }
        }
        ReplayCall::VaultCreate { path, data } => {
            if let Err(err) = host.vault.create.call((path.clone(), data)) {
                warn!(target: "xtask::replay", path, "create failed: {err}");
            }
        }
        ReplayCall::VaultRead { path } => match host.vault.get_file(&path) {
            Some(file) => {
                let _ = host.vault.read.call(file);
            }
            None => warn!(target: "xtask::replay", path, "read of missing file skipped"),
        },
        ReplayCall::VaultModify { path, data } => match host.vault.get_file(&path) {
            Some(file) => {
                let _ = host.vault.modify.call((file, data));
            }
            None => warn!(target: "xtask::replay", path, "modify of missing file skipped"),
        },
        ReplayCall::VaultDelete { path } => match host.vault.get_file(&path) {
            Some(file) => {
                let _ = host.vault.delete.call(file);
            }
            None => warn!(target: "xtask::replay", path, "delete of missing file skipped"),
        },
        ReplayCall::Command { id } => {
            host.commands.execute_command_by_id.call(id);
        }
        ReplayCall::WindowOpen { url } => {
            host.commands.window_open.call(WindowOpen {
                url,
                ..WindowOpen::default()
            });
        }
        ReplayCall::Key { key, ctrl, meta } => {
            let event = KeyboardEvent {
                ctrl,
                meta,
                ..KeyboardEvent::key_down(&key)
            };
            host.document.dispatch_key(&event);
        }
        ReplayCall::Storage { key, value } => host.storage.set_item.call((key, value)),
        ReplayCall::Worker { url } => {
            host.constructors.worker.call(WorkerInit {
                script_url: url,
                options: None,
            });
        }
        ReplayCall::Websocket { url } => {
            host.constructors.websocket.call(WebSocketInit {
                url,
                protocols: Vec::new(),
            });
        }
        ReplayCall::Workspace { event } => {
            let event = match event.as_str() {
                "layout-change" => WorkspaceEvent::LayoutChange,
                "resize" => WorkspaceEvent::Resize,
                "css-change" => WorkspaceEvent::CssChange,
                "file-open" => WorkspaceEvent::FileOpen(None),
                "active-leaf-change" => WorkspaceEvent::ActiveLeafChange(None),
                other => {
                    warn!(target: "xtask::replay", event = other, "unknown workspace event skipped");
                    return;
                }
            };
            host.workspace.events.trigger(&event);
        }
        ReplayCall::MetadataResolved => {
            host.metadata_cache.trigger(&MetadataEvent::Resolved);
        }
        ReplayCall::Advance { ms } => {
            host.advance(ms);
        }
    }
}

// ---- perf ------------------------------------------------------------------

struct PerfArgs {
    iterations: usize,
}

fn parse_perf_args(args: Vec<String>) -> Result<PerfArgs> {
    let mut iterations: usize = 10_000;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--iterations" => {
                let raw = it.next().context("--iterations requires a value")?;
                iterations = raw
                    .parse::<usize>()
                    .with_context(|| format!("invalid --iterations: {raw}"))?;
            }
            other => bail!("unknown perf arg: {other}"),
        }
    }
    Ok(PerfArgs {
        iterations: iterations.max(1),
    })
}

fn sample_stacks() -> Vec<String> {
    vec![
        "Error\n    at fetch (plugin:obsidian-extension-watcher:1:1)\n    at sync (plugin:remotely-save:12:40)".to_string(),
        "Error\n    at dispatch (app://obsidian.md/app.js:1:2)".to_string(),
        "Error\n    at load (/vault/.obsidian/plugins/dataview/main.js:3:9)".to_string(),
        "Error\n    at <anonymous>\n    at Object.eval (eval at run:1:1)".to_string(),
        String::new(),
    ]
}

fn cmd_perf(args: Vec<String>) -> Result<()> {
    let args = parse_perf_args(args)?;
    let stacks = sample_stacks();
    let attributor = StackAttributor::new();

    let mut attribute_samples: Vec<u128> = Vec::with_capacity(args.iterations);
    let attribute_start = Instant::now();
    for i in 0..args.iterations {
        let stack = &stacks[i % stacks.len()];
        let started = Instant::now();
        let _ = attributor.attribute(Some(stack.as_str()));
        attribute_samples.push(started.elapsed().as_micros());
    }
    let attribute_ms = attribute_start.elapsed().as_millis();

    let mut throttle = RequestThrottle::new();
    let mut throttle_samples: Vec<u128> = Vec::with_capacity(args.iterations);
    let mut recorded = 0usize;
    let mut grouped = 0usize;
    let throttle_start = Instant::now();
    for i in 0..args.iterations {
        let key = request_key("poller", "GET", &format!("https://api.test/{}", i % 64));
        let now_ms = (i as u64) * 7;
        let started = Instant::now();
        match throttle.check(&key, now_ms) {
            ThrottleDecision::Record => recorded += 1,
            ThrottleDecision::RecordGrouped(_) => grouped += 1,
            ThrottleDecision::Suppress => {}
        }
        if now_ms % throttle.config().cleanup_interval_ms == 0 {
            throttle.sweep(now_ms);
        }
        throttle_samples.push(started.elapsed().as_micros());
    }
    let throttle_ms = throttle_start.elapsed().as_millis();

    println!("perf:");
    println!("  iterations: {}", args.iterations);
    println!("  attribute_total_ms: {attribute_ms}");
    println!("  attribute_p50_us: {}", percentile(&attribute_samples, 50.0));
    println!("  attribute_p95_us: {}", percentile(&attribute_samples, 95.0));
    println!("  throttle_total_ms: {throttle_ms}");
    println!("  throttle_p50_us: {}", percentile(&throttle_samples, 50.0));
    println!("  throttle_p95_us: {}", percentile(&throttle_samples, 95.0));
    println!("  throttle_recorded: {recorded}");
    println!("  throttle_grouped: {grouped}");
    println!("  throttle_live_keys: {}", throttle.len());
    if let Some((rss_kb, virt_kb)) = current_process_memory_kb() {
        println!("  process_memory_kb: {rss_kb}");
        println!("  process_virtual_memory_kb: {virt_kb}");
    }
    Ok(())
}

fn percentile(samples: &[u128], percentile: f64) -> u128 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let rank = ((percentile / 100.0) * ((sorted.len() - 1) as f64)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn current_process_memory_kb() -> Option<(u64, u64)> {
    let mut system = System::new();
    system.refresh_processes();
    let pid = Pid::from_u32(std::process::id());
    let process = system.process(pid)?;
    Some((process.memory() / 1024, process.virtual_memory() / 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_lines_parse_with_optional_extension() {
        let line: ReplayLine =
            serde_json::from_str(r#"{"ext":"dataview","call":"vaultCreate","path":"a.md"}"#)
                .expect("parse line");
        assert_eq!(line.ext.as_deref(), Some("dataview"));
        assert!(matches!(
            line.call,
            ReplayCall::VaultCreate { ref path, ref data } if path == "a.md" && data.is_empty()
        ));

        let line: ReplayLine =
            serde_json::from_str(r#"{"call":"metadataResolved"}"#).expect("parse unit call");
        assert!(line.ext.is_none());
        assert!(matches!(line.call, ReplayCall::MetadataResolved));
    }

    #[test]
    fn percentile_picks_nearest_rank() {
        let samples = vec![5, 1, 4, 2, 3];
        assert_eq!(percentile(&samples, 50.0), 3);
        assert_eq!(percentile(&samples, 95.0), 5);
        assert_eq!(percentile(&[], 95.0), 0);
    }

    #[test]
    fn replayed_calls_reach_the_watcher() {
        let host = HostApi::new(0);
        let settings = WatcherSettings {
            log_to_console: false,
            ..WatcherSettings::default()
        };
        let mut watcher = ExtensionWatcher::for_host(&host, settings);
        watcher.load(Rc::clone(&host));

        host.run_as("quickadd", || {
            replay_call(
                &host,
                ReplayCall::VaultCreate {
                    path: "Inbox/idea.md".to_string(),
                    data: "# idea".to_string(),
                },
            )
        });
        replay_call(
            &host,
            ReplayCall::VaultRead {
                path: "missing.md".to_string(),
            },
        );

        let logs = watcher.get_logs_for_plugin("quickadd");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "create");
    }
}
