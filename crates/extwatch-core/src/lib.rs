//! Runtime activity monitor for a note-taking host.
//!
//! Host surfaces (network, vault, commands, DOM, timers, event buses) are routed
//! through an interception registry. Monitors install wrappers on those surfaces,
//! attribute each call to the extension that made it by classifying a captured
//! call stack, throttle chatty network traffic, and append interpreted
//! observations to a bounded activity log.
//!
//! Everything here assumes the host's single logical thread: shared state uses
//! `Rc<RefCell<_>>`, never locks. A multi-threaded host must confine the watcher
//! to one thread.

pub mod activity_log;
pub mod attribution;
pub mod clock;
pub mod error;
pub mod format;
pub mod host;
pub mod interpret;
pub mod keybind;
pub mod monitor;
pub mod observation;
pub mod paths;
pub mod settings;
pub mod surface;
pub mod throttle;
pub mod watcher;

pub use attribution::{Attribution, StackAttributor};
pub use observation::{Category, Observation, ObservationDraft};
pub use watcher::ExtensionWatcher;
