//! Interception registry for host surfaces.
//!
//! Every patchable host entry point is a [`HostFn`]: a named slot holding the
//! current implementation. Monitors replace the slot through
//! [`install_wrapper`] and keep the returned [`RestoreHandle`], which puts the
//! captured original back.

use crate::attribution::{StackCapture, SELF_EXTENSION_ID};
use crate::clock::Clock;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

pub type HostCallback<A, R> = Rc<dyn Fn(A) -> R>;

/// A replaceable host function or constructor.
pub struct HostFn<A, R> {
    label: String,
    current: RefCell<HostCallback<A, R>>,
}

impl<A: 'static, R: 'static> HostFn<A, R> {
    pub fn new(label: impl Into<String>, f: impl Fn(A) -> R + 'static) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            current: RefCell::new(Rc::new(f)),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Calls whatever implementation is installed right now.
    pub fn call(&self, args: A) -> R {
        // Release the slot before calling so the callee may re-enter or swap it.
        let current = self.current();
        current(args)
    }

    pub fn current(&self) -> HostCallback<A, R> {
        Rc::clone(&self.current.borrow())
    }

    pub fn swap(&self, next: HostCallback<A, R>) -> HostCallback<A, R> {
        std::mem::replace(&mut *self.current.borrow_mut(), next)
    }
}

impl<A, R> std::fmt::Debug for HostFn<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFn").field("label", &self.label).finish()
    }
}

/// Undo for one installed wrapper or listener. Consumed on use.
pub struct RestoreHandle {
    label: String,
    restore: Option<Box<dyn FnOnce()>>,
}

impl RestoreHandle {
    pub fn new(label: impl Into<String>, restore: impl FnOnce() + 'static) -> Self {
        Self {
            label: label.into(),
            restore: Some(Box::new(restore)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn restore(mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

impl std::fmt::Debug for RestoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreHandle")
            .field("label", &self.label)
            .field("pending", &self.restore.is_some())
            .finish()
    }
}

/// Wraps `target`. `factory` receives the implementation being replaced and
/// returns its replacement. The handle reinstalls that exact original.
pub fn install_wrapper<A: 'static, R: 'static>(
    target: &Rc<HostFn<A, R>>,
    factory: impl FnOnce(HostCallback<A, R>) -> HostCallback<A, R>,
) -> RestoreHandle {
    let original = target.current();
    let wrapped = factory(Rc::clone(&original));
    target.swap(wrapped);
    debug!(target: "extwatch::host", surface = target.label(), "wrapper installed");

    let target = Rc::clone(target);
    RestoreHandle::new(target.label().to_string(), move || {
        target.swap(original);
        debug!(target: "extwatch::host", surface = target.label(), "original restored");
    })
}

/// Restore handles of one monitor, undone newest first.
#[derive(Debug, Default)]
pub struct RestoreSet {
    handles: Vec<RestoreHandle>,
}

impl RestoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: RestoreHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn restore_all(&mut self) -> usize {
        let count = self.handles.len();
        while let Some(handle) = self.handles.pop() {
            handle.restore();
        }
        count
    }
}

/// An event a host bus can deliver. `name` is the subscription key.
pub trait HostEvent: 'static {
    fn name(&self) -> &'static str;
}

pub type Listener<E> = Rc<dyn Fn(&E)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

struct Registration<E> {
    id: ListenerId,
    event: String,
    listener: Listener<E>,
}

/// Named-event emitter in the style of the host's `on`/`off`/`trigger`.
pub struct EventBus<E> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<Registration<E>>>,
}

impl<E: HostEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<E: HostEvent> EventBus<E> {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn on(&self, event: &str, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Registration {
            id,
            event: event.to_string(),
            listener,
        });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|reg| reg.id != id);
        listeners.len() != before
    }

    /// Subscribes and returns a handle that unsubscribes.
    pub fn on_scoped(self: &Rc<Self>, event: &str, listener: Listener<E>) -> RestoreHandle {
        let id = self.on(event, listener);
        let bus = Rc::clone(self);
        RestoreHandle::new(format!("listener:{event}"), move || {
            bus.off(id);
        })
    }

    /// Delivers `payload` to every listener registered for its name. Returns how many ran.
    pub fn trigger(&self, payload: &E) -> usize {
        let name = payload.name();
        let targets = self
            .listeners
            .borrow()
            .iter()
            .filter(|reg| reg.event == name)
            .map(|reg| Rc::clone(&reg.listener))
            .collect::<Vec<_>>();
        for listener in &targets {
            listener(payload);
        }
        targets.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|reg| reg.event == event)
            .count()
    }
}

pub type TimerCallback = Rc<dyn Fn()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    due_ms: u64,
    every_ms: Option<u64>,
    callback: TimerCallback,
}

/// The host's timer service. Timers fire only from [`Timers::run_due`].
pub struct Timers {
    clock: Rc<dyn Clock>,
    next_id: Cell<u64>,
    entries: RefCell<BTreeMap<TimerId, TimerEntry>>,
}

impl Timers {
    pub fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            clock,
            next_id: Cell::new(1),
            entries: RefCell::new(BTreeMap::new()),
        })
    }

    fn schedule(&self, delay_ms: u64, every_ms: Option<u64>, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().insert(
            id,
            TimerEntry {
                due_ms: self.clock.now_ms().saturating_add(delay_ms),
                every_ms,
                callback,
            },
        );
        id
    }

    pub fn set_interval(&self, every_ms: u64, callback: TimerCallback) -> TimerId {
        let every_ms = every_ms.max(1);
        self.schedule(every_ms, Some(every_ms), callback)
    }

    pub fn set_timeout(&self, delay_ms: u64, callback: TimerCallback) -> TimerId {
        self.schedule(delay_ms, None, callback)
    }

    pub fn clear(&self, id: TimerId) -> bool {
        self.entries.borrow_mut().remove(&id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    pub fn next_due(&self) -> Option<u64> {
        self.entries.borrow().values().map(|entry| entry.due_ms).min()
    }

    /// Fires every timer due at the clock's current time, earliest first.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now_ms();
        let mut fired = 0;
        loop {
            let next = {
                let mut entries = self.entries.borrow_mut();
                let due = entries
                    .iter()
                    .filter(|(_, entry)| entry.due_ms <= now)
                    .min_by_key(|(id, entry)| (entry.due_ms, **id))
                    .map(|(id, _)| *id);
                let Some(mut entry) = due.and_then(|id| entries.remove(&id).map(|e| (id, e)))
                else {
                    break;
                };
                let callback = Rc::clone(&entry.1.callback);
                if let Some(every) = entry.1.every_ms {
                    entry.1.due_ms = entry.1.due_ms.saturating_add(every);
                    entries.insert(entry.0, entry.1);
                }
                callback
            };
            next();
            fired += 1;
        }
        fired
    }
}

/// Scripted call stack for the simulated host.
///
/// Code acting on behalf of an extension enters a frame; [`StackCapture`]
/// renders the frames innermost first below an `Error` header and the
/// watcher's own capture frame, the way a host stack trace reads.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: RefCell<Vec<String>>,
}

impl CallStack {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn extension_frame(extension_id: &str, function: &str) -> String {
        format!("{function} (plugin:{extension_id}:1:1)")
    }

    pub fn core_frame(function: &str) -> String {
        format!("{function} ({}:1:1)", crate::attribution::HOST_BUNDLE_MARKER)
    }

    pub fn enter(self: &Rc<Self>, frame: impl Into<String>) -> FrameGuard {
        self.frames.borrow_mut().push(frame.into());
        FrameGuard {
            stack: Rc::clone(self),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Error");
        out.push_str(&format!(
            "\n    at capture (plugin:{SELF_EXTENSION_ID}:1:1)"
        ));
        for frame in self.frames.borrow().iter().rev() {
            out.push_str("\n    at ");
            out.push_str(frame);
        }
        out
    }
}

impl StackCapture for CallStack {
    fn capture(&self) -> Option<String> {
        Some(self.render())
    }
}

/// Pops the frame it pushed when dropped.
pub struct FrameGuard {
    stack: Rc<CallStack>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.stack.frames.borrow_mut().pop();
    }
}
