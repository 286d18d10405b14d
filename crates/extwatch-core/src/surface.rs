//! In-process model of the host application's patchable API.
//!
//! Each field that extensions can call is a [`HostFn`] slot so monitors can
//! wrap it. Default implementations are deliberately small: an in-memory
//! vault, a command registry, canned network responses and event buses that
//! the embedding code (or a test) triggers.

use crate::attribution::StackCapture;
use crate::clock::{Clock, ManualClock};
use crate::host::{
    CallStack, EventBus, HostEvent, HostFn, Listener, ListenerId, TimerCallback, TimerId, Timers,
};
use crate::keybind::KeyboardEvent;
use crate::paths;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

/// Failure returned by a host call. Passed through the wrappers untouched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

// ---- network ---------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub cache: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub ok: bool,
    pub url: String,
    pub redirected: bool,
    pub response_type: String,
    pub headers: BTreeMap<String, String>,
}

impl FetchResponse {
    pub fn with_status(url: &str, status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            ok: (200..300).contains(&status),
            url: url.to_string(),
            redirected: false,
            response_type: "basic".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XhrOpen {
    pub method: String,
    pub url: String,
}

/// State of an XHR at `send` time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XhrSend {
    #[serde(default)]
    pub opened: bool,
    #[serde(default)]
    pub response_url: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRequest {
    pub url: String,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUrlParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RequestUrlParams {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestUrlResponse {
    pub status: u16,
    pub text: String,
}

pub type RequestUrlFn = HostFn<RequestUrlParams, HostResult<RequestUrlResponse>>;

pub const REQUEST_URL_SITES: [&str; 4] = [
    "window.requestUrl",
    "window.obsidian.requestUrl",
    "window.app.plugins.requestUrl",
    "obsidian-module",
];

pub struct NetworkSurface {
    pub fetch: Rc<HostFn<FetchRequest, HostResult<FetchResponse>>>,
    pub xhr_open: Rc<HostFn<XhrOpen, ()>>,
    pub xhr_send: Rc<HostFn<XhrSend, ()>>,
    pub send_beacon: Rc<HostFn<BeaconRequest, bool>>,
    /// One slot per place the host exposes `requestUrl`, labelled by access path.
    pub request_url_sites: Vec<Rc<RequestUrlFn>>,
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl NetworkSurface {
    fn new() -> Self {
        Self {
            fetch: HostFn::new("window.fetch", |request: FetchRequest| {
                if is_http_url(&request.url) {
                    Ok(FetchResponse::with_status(&request.url, 200, "OK"))
                } else {
                    Err(HostError::new("Failed to fetch"))
                }
            }),
            xhr_open: HostFn::new("XMLHttpRequest.open", |_: XhrOpen| {}),
            xhr_send: HostFn::new("XMLHttpRequest.send", |_: XhrSend| {}),
            send_beacon: HostFn::new("navigator.sendBeacon", |beacon: BeaconRequest| {
                is_http_url(&beacon.url)
            }),
            request_url_sites: REQUEST_URL_SITES
                .iter()
                .map(|site| {
                    HostFn::new(*site, |params: RequestUrlParams| {
                        match params.url.as_deref() {
                            Some(url) if is_http_url(url) => Ok(RequestUrlResponse {
                                status: 200,
                                text: String::new(),
                            }),
                            _ => Err(HostError::new("net::ERR_INVALID_URL")),
                        }
                    })
                })
                .collect(),
        }
    }

    pub fn request_url(&self) -> Option<&Rc<RequestUrlFn>> {
        self.request_url_sites.first()
    }
}

// ---- vault -----------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFile {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl VaultFile {
    fn new(path: &str, size: u64, now_ms: u64) -> Self {
        Self {
            path: path.to_string(),
            name: paths::file_name(path).to_string(),
            extension: paths::file_extension(path),
            size,
            mtime: now_ms,
            ctime: now_ms,
        }
    }
}

type VaultStore = Rc<RefCell<BTreeMap<String, (VaultFile, String)>>>;

pub struct VaultSurface {
    store: VaultStore,
    pub read: Rc<HostFn<VaultFile, HostResult<String>>>,
    pub modify: Rc<HostFn<(VaultFile, String), HostResult<()>>>,
    pub create: Rc<HostFn<(String, String), HostResult<VaultFile>>>,
    pub delete: Rc<HostFn<VaultFile, HostResult<()>>>,
}

impl VaultSurface {
    fn new(clock: Rc<dyn Clock>) -> Self {
        let store: VaultStore = Rc::new(RefCell::new(BTreeMap::new()));

        let read = {
            let store = Rc::clone(&store);
            HostFn::new("vault.read", move |file: VaultFile| {
                store
                    .borrow()
                    .get(&file.path)
                    .map(|(_, content)| content.clone())
                    .ok_or_else(|| HostError::new(format!("file not found: {}", file.path)))
            })
        };

        let modify = {
            let store = Rc::clone(&store);
            let clock = Rc::clone(&clock);
            HostFn::new("vault.modify", move |(file, data): (VaultFile, String)| {
                let mut store = store.borrow_mut();
                let Some((meta, content)) = store.get_mut(&file.path) else {
                    return Err(HostError::new(format!("file not found: {}", file.path)));
                };
                meta.size = data.len() as u64;
                meta.mtime = clock.now_ms();
                *content = data;
                Ok(())
            })
        };

        let create = {
            let store = Rc::clone(&store);
            let clock = Rc::clone(&clock);
            HostFn::new("vault.create", move |(path, data): (String, String)| {
                let path = paths::normalize_vault_path(&path)
                    .map_err(|err| HostError::new(err.to_string()))?;
                let mut store = store.borrow_mut();
                if store.contains_key(&path) {
                    return Err(HostError::new("File already exists."));
                }
                let file = VaultFile::new(&path, data.len() as u64, clock.now_ms());
                store.insert(path, (file.clone(), data));
                Ok(file)
            })
        };

        let delete = {
            let store = Rc::clone(&store);
            HostFn::new("vault.delete", move |file: VaultFile| {
                store
                    .borrow_mut()
                    .remove(&file.path)
                    .map(|_| ())
                    .ok_or_else(|| HostError::new(format!("file not found: {}", file.path)))
            })
        };

        Self {
            store,
            read,
            modify,
            create,
            delete,
        }
    }

    pub fn get_file(&self, path: &str) -> Option<VaultFile> {
        self.store.borrow().get(path).map(|(file, _)| file.clone())
    }

    pub fn file_count(&self) -> usize {
        self.store.borrow().len()
    }
}

// ---- commands --------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOpen {
    pub url: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub features: Option<String>,
}

type CommandRegistry = Rc<RefCell<BTreeMap<String, Rc<dyn Fn()>>>>;

pub struct CommandSurface {
    registry: CommandRegistry,
    opened: Rc<RefCell<Vec<String>>>,
    pub execute_command_by_id: Rc<HostFn<String, bool>>,
    pub window_open: Rc<HostFn<WindowOpen, bool>>,
}

impl CommandSurface {
    fn new() -> Self {
        let registry: CommandRegistry = Rc::new(RefCell::new(BTreeMap::new()));
        let opened = Rc::new(RefCell::new(Vec::new()));

        let execute_command_by_id = {
            let registry = Rc::clone(&registry);
            HostFn::new("app.commands.executeCommandById", move |id: String| {
                let callback = registry.borrow().get(&id).cloned();
                match callback {
                    Some(callback) => {
                        callback();
                        true
                    }
                    None => false,
                }
            })
        };

        let window_open = {
            let opened = Rc::clone(&opened);
            HostFn::new("window.open", move |request: WindowOpen| {
                opened.borrow_mut().push(request.url);
                true
            })
        };

        Self {
            registry,
            opened,
            execute_command_by_id,
            window_open,
        }
    }

    pub fn add_command(&self, id: &str, callback: impl Fn() + 'static) {
        self.registry
            .borrow_mut()
            .insert(id.to_string(), Rc::new(callback));
    }

    pub fn command_ids(&self) -> Vec<String> {
        self.registry.borrow().keys().cloned().collect()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }
}

// ---- workspace & editor ----------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafView {
    pub view_type: String,
    #[serde(default)]
    pub file: Option<VaultFile>,
    #[serde(default)]
    pub has_selection: bool,
    #[serde(default)]
    pub cursor: Option<(u32, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceState {
    pub active_leaf: Option<LeafView>,
    pub has_left_split: bool,
    pub has_right_split: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            active_leaf: None,
            has_left_split: true,
            has_right_split: true,
            window_width: 1280,
            window_height: 800,
        }
    }
}

impl WorkspaceState {
    pub fn active_view_type(&self) -> Option<&str> {
        self.active_leaf.as_ref().map(|leaf| leaf.view_type.as_str())
    }

    pub fn active_file(&self) -> Option<&VaultFile> {
        self.active_leaf.as_ref().and_then(|leaf| leaf.file.as_ref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub content: String,
    #[serde(default)]
    pub cursor_line: u32,
    #[serde(default)]
    pub cursor_ch: u32,
    #[serde(default)]
    pub selection: String,
}

impl EditorSnapshot {
    pub fn line_count(&self) -> usize {
        self.content.split('\n').count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorChangeInfo {
    pub origin: Option<String>,
    #[serde(default)]
    pub from: Option<(u32, u32)>,
    #[serde(default)]
    pub to: Option<(u32, u32)>,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkspaceEvent {
    LayoutChange,
    ActiveLeafChange(Option<LeafView>),
    FileOpen(Option<VaultFile>),
    Resize,
    CssChange,
    EditorChange {
        editor: EditorSnapshot,
        info: Option<EditorChangeInfo>,
    },
}

impl HostEvent for WorkspaceEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::LayoutChange => "layout-change",
            Self::ActiveLeafChange(_) => "active-leaf-change",
            Self::FileOpen(_) => "file-open",
            Self::Resize => "resize",
            Self::CssChange => "css-change",
            Self::EditorChange { .. } => "editor-change",
        }
    }
}

pub struct WorkspaceSurface {
    pub state: Rc<RefCell<WorkspaceState>>,
    pub events: Rc<EventBus<WorkspaceEvent>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataEvent {
    Changed(VaultFile),
    Resolved,
}

impl HostEvent for MetadataEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Changed(_) => "changed",
            Self::Resolved => "resolved",
        }
    }
}

// ---- document --------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateElement {
    pub tag_name: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub node_name: String,
    #[serde(default)]
    pub class_list: Vec<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub src: Option<String>,
}

impl Element {
    pub fn class_name(&self) -> String {
        self.class_list.join(" ")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class_list.iter().any(|c| c == class)
    }
}

pub type KeyListener = Listener<KeyboardEvent>;

pub struct DocumentSurface {
    key_listeners: Rc<EventBus<KeyboardEvent>>,
    appended: Rc<RefCell<Vec<Element>>>,
    pub add_event_listener: Rc<HostFn<(String, KeyListener), ListenerId>>,
    pub create_element: Rc<HostFn<CreateElement, Element>>,
    pub append_child: Rc<HostFn<Element, Element>>,
}

impl DocumentSurface {
    fn new() -> Self {
        let key_listeners = EventBus::new();
        let appended = Rc::new(RefCell::new(Vec::new()));

        let add_event_listener = {
            let bus = Rc::clone(&key_listeners);
            HostFn::new(
                "document.addEventListener",
                move |(event, listener): (String, KeyListener)| bus.on(&event, listener),
            )
        };

        let create_element = HostFn::new("document.createElement", |spec: CreateElement| Element {
            node_name: spec.tag_name.to_ascii_uppercase(),
            class_list: spec
                .class_name
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            id: spec.id.unwrap_or_default(),
            src: None,
        });

        let append_child = {
            let appended = Rc::clone(&appended);
            HostFn::new("Element.appendChild", move |element: Element| {
                appended.borrow_mut().push(element.clone());
                element
            })
        };

        Self {
            key_listeners,
            appended,
            add_event_listener,
            create_element,
            append_child,
        }
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.key_listeners.off(id)
    }

    /// Delivers a key event to listeners registered for its type.
    pub fn dispatch_key(&self, event: &KeyboardEvent) -> usize {
        self.key_listeners.trigger(event)
    }

    pub fn key_listener_count(&self, event: &str) -> usize {
        self.key_listeners.listener_count(event)
    }

    pub fn appended(&self) -> Vec<Element> {
        self.appended.borrow().clone()
    }
}

// ---- storage, constructors, scheduling -------------------------------------

pub struct StorageSurface {
    items: Rc<RefCell<BTreeMap<String, String>>>,
    pub set_item: Rc<HostFn<(String, String), ()>>,
}

impl StorageSurface {
    fn new() -> Self {
        let items = Rc::new(RefCell::new(BTreeMap::new()));
        let set_item = {
            let items = Rc::clone(&items);
            HostFn::new("localStorage.setItem", move |(key, value): (String, String)| {
                items.borrow_mut().insert(key, value);
            })
        };
        Self { items, set_item }
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }
}

/// Instance handed back by a wrapped constructor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostObject {
    pub id: u64,
    pub kind: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInit {
    pub script_url: String,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceInit {
    pub url: String,
    #[serde(default)]
    pub with_credentials: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketInit {
    pub url: String,
    #[serde(default)]
    pub protocols: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInit {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInit {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub status_text: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

pub struct ConstructorSurface {
    pub worker: Rc<HostFn<WorkerInit, HostObject>>,
    pub event_source: Rc<HostFn<EventSourceInit, HostObject>>,
    pub websocket: Rc<HostFn<WebSocketInit, HostObject>>,
    pub request: Rc<HostFn<RequestInit, HostObject>>,
    pub response: Rc<HostFn<ResponseInit, HostObject>>,
}

impl ConstructorSurface {
    fn new() -> Self {
        let next_id = Rc::new(Cell::new(1u64));
        let make = move |kind: &'static str| {
            let next_id = Rc::clone(&next_id);
            move |url: Option<String>| {
                let id = next_id.get();
                next_id.set(id + 1);
                HostObject {
                    id,
                    kind: kind.to_string(),
                    url,
                }
            }
        };

        let worker = make("Worker");
        let event_source = make("EventSource");
        let websocket = make("WebSocket");
        let request = make("Request");
        let response = make("Response");

        Self {
            worker: HostFn::new("window.Worker", move |init: WorkerInit| {
                worker(Some(init.script_url))
            }),
            event_source: HostFn::new("window.EventSource", move |init: EventSourceInit| {
                event_source(Some(init.url))
            }),
            websocket: HostFn::new("window.WebSocket", move |init: WebSocketInit| {
                websocket(Some(init.url))
            }),
            request: HostFn::new("window.Request", move |init: RequestInit| {
                request(Some(init.url))
            }),
            response: HostFn::new("window.Response", move |_: ResponseInit| response(None)),
        }
    }
}

pub struct SchedulerSurface {
    pub set_timeout: Rc<HostFn<(TimerCallback, u64), TimerId>>,
    pub promise_all: Rc<HostFn<Vec<Value>, Vec<Value>>>,
}

impl SchedulerSurface {
    fn new(timers: Rc<Timers>) -> Self {
        Self {
            set_timeout: HostFn::new(
                "window.setTimeout",
                move |(callback, delay_ms): (TimerCallback, u64)| {
                    timers.set_timeout(delay_ms, callback)
                },
            ),
            promise_all: HostFn::new("Promise.all", |values: Vec<Value>| values),
        }
    }
}

// ---- the host --------------------------------------------------------------

/// The whole patchable surface of one host instance.
pub struct HostApi {
    pub clock: Rc<ManualClock>,
    pub stack: Rc<CallStack>,
    pub timers: Rc<Timers>,
    pub network: NetworkSurface,
    pub vault: VaultSurface,
    pub commands: CommandSurface,
    pub workspace: WorkspaceSurface,
    pub metadata_cache: Rc<EventBus<MetadataEvent>>,
    pub document: DocumentSurface,
    pub storage: StorageSurface,
    pub constructors: ConstructorSurface,
    pub scheduler: SchedulerSurface,
}

impl HostApi {
    pub fn new(start_ms: u64) -> Rc<Self> {
        let clock = Rc::new(ManualClock::new(start_ms));
        let timers = Timers::new(clock.clone());
        Rc::new(Self {
            stack: CallStack::new(),
            network: NetworkSurface::new(),
            vault: VaultSurface::new(clock.clone()),
            commands: CommandSurface::new(),
            workspace: WorkspaceSurface {
                state: Rc::new(RefCell::new(WorkspaceState::default())),
                events: EventBus::new(),
            },
            metadata_cache: EventBus::new(),
            document: DocumentSurface::new(),
            storage: StorageSurface::new(),
            constructors: ConstructorSurface::new(),
            scheduler: SchedulerSurface::new(Rc::clone(&timers)),
            timers,
            clock,
        })
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn stack_capture(&self) -> Rc<dyn StackCapture> {
        self.stack.clone()
    }

    pub fn clock_handle(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    /// Moves time forward, firing each timer at its own due time. Returns how many fired.
    pub fn advance(&self, delta_ms: u64) -> usize {
        let target = self.clock.now_ms().saturating_add(delta_ms);
        let mut fired = 0;
        while let Some(due) = self.timers.next_due().filter(|due| *due <= target) {
            self.clock.set(due.max(self.clock.now_ms()));
            let ran = self.timers.run_due();
            if ran == 0 {
                break;
            }
            fired += ran;
        }
        self.clock.set(target);
        fired + self.timers.run_due()
    }

    /// Runs `f` as if called from inside `extension_id`'s code.
    pub fn run_as<R>(&self, extension_id: &str, f: impl FnOnce() -> R) -> R {
        let _frame = self
            .stack
            .enter(CallStack::extension_frame(extension_id, "onUserAction"));
        f()
    }

    /// Runs `f` as if called from the host's own bundle.
    pub fn run_as_core<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.stack.enter(CallStack::core_frame("dispatch"));
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fetch_accepts_http_only() {
        let host = HostApi::new(0);
        let ok = host
            .network
            .fetch
            .call(FetchRequest::get("https://api.test/x"))
            .expect("http fetch");
        assert_eq!(ok.status, 200);
        assert!(ok.ok);
        assert!(host.network.fetch.call(FetchRequest::get("file:///etc")).is_err());
        assert_eq!(host.network.request_url_sites.len(), 4);
        assert_eq!(
            host.network.request_url().map(|site| site.label().to_string()),
            Some("window.requestUrl".to_string())
        );
    }

    #[test]
    fn vault_round_trip() {
        let host = HostApi::new(10);
        let file = host
            .vault
            .create
            .call(("./notes/a.md".to_string(), "# A".to_string()))
            .expect("create");
        assert_eq!(file.path, "notes/a.md");
        assert_eq!(file.extension, "md");
        assert_eq!(file.ctime, 10);

        assert!(host
            .vault
            .create
            .call(("notes/a.md".to_string(), String::new()))
            .is_err());

        host.clock.advance(5);
        host.vault
            .modify
            .call((file.clone(), "# A\nmore".to_string()))
            .expect("modify");
        assert_eq!(host.vault.read.call(file.clone()).expect("read"), "# A\nmore");
        assert_eq!(host.vault.get_file("notes/a.md").map(|f| f.mtime), Some(15));

        host.vault.delete.call(file.clone()).expect("delete");
        assert!(host.vault.read.call(file).is_err());
        assert_eq!(host.vault.file_count(), 0);
    }

    #[test]
    fn commands_run_registered_callbacks() {
        let host = HostApi::new(0);
        let ran = Rc::new(Cell::new(false));
        let ran_in = Rc::clone(&ran);
        host.commands.add_command("app:reload", move || ran_in.set(true));

        assert!(host.commands.execute_command_by_id.call("app:reload".to_string()));
        assert!(ran.get());
        assert!(!host.commands.execute_command_by_id.call("missing".to_string()));
        assert_eq!(host.commands.command_ids(), vec!["app:reload"]);
    }

    #[test]
    fn document_elements_and_key_listeners() {
        let host = HostApi::new(0);
        let element = host.document.create_element.call(CreateElement {
            tag_name: "div".to_string(),
            class_name: Some("modal mod-settings".to_string()),
            id: None,
        });
        assert_eq!(element.node_name, "DIV");
        assert!(element.has_class("modal"));
        assert_eq!(element.class_name(), "modal mod-settings");

        let presses = Rc::new(Cell::new(0));
        let presses_in = Rc::clone(&presses);
        let id = host.document.add_event_listener.call((
            "keydown".to_string(),
            Rc::new(move |_: &KeyboardEvent| presses_in.set(presses_in.get() + 1)),
        ));
        assert_eq!(host.document.dispatch_key(&KeyboardEvent::key_down("a")), 1);
        assert_eq!(presses.get(), 1);
        assert!(host.document.remove_event_listener(id));
        assert_eq!(host.document.key_listener_count("keydown"), 0);
    }

    #[test]
    fn advance_fires_timers_at_their_due_time() {
        let host = HostApi::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);
        let clock = host.clock.clone();
        host.timers.set_interval(
            100,
            Rc::new(move || seen_in.borrow_mut().push(clock.now_ms())),
        );
        let once = host
            .scheduler
            .set_timeout
            .call((Rc::new(|| {}) as TimerCallback, 150));

        assert_eq!(host.advance(250), 3);
        assert_eq!(*seen.borrow(), vec![100, 200]);
        assert!(!host.timers.is_pending(once));
        assert_eq!(host.now_ms(), 250);
    }

    #[test]
    fn constructors_hand_out_distinct_objects() {
        let host = HostApi::new(0);
        let a = host.constructors.websocket.call(WebSocketInit {
            url: "wss://live.test".to_string(),
            protocols: Vec::new(),
        });
        let b = host.constructors.response.call(ResponseInit::default());
        assert_ne!(a.id, b.id);
        assert_eq!(a.kind, "WebSocket");
        assert_eq!(b.url, None);
    }
}
