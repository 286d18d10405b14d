use regex::Regex;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::sync::LazyLock;
use tracing::debug;

/// Identity of the watcher itself as it appears in host stack frames.
pub const SELF_EXTENSION_ID: &str = "obsidian-extension-watcher";
/// Literal the host uses for its own module namespace.
pub const HOST_CORE_ID: &str = "obsidian.md";
/// Script URL of the host's runtime bundle.
pub const HOST_BUNDLE_MARKER: &str = "app://obsidian.md/app.js";

const CORE_TAG: &str = "core";
const UNKNOWN_TAG: &str = "unknown";
const INVALID_SENTINEL: &str = "invalid";
const CORE_HINTS: &[&str] = &[HOST_BUNDLE_MARKER, HOST_CORE_ID, "app.js"];

// Order is load-bearing: the first pattern with a valid capture wins.
static FRAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"plugin:([^:)]+):").expect("hardcoded regex"),
        Regex::new(r"plugins/([^/]+)/").expect("hardcoded regex"),
        Regex::new(r"at\s+\w+\s+\(plugin:([^:)]+):").expect("hardcoded regex"),
        Regex::new(r"\(plugin:([^)]+)\)").expect("hardcoded regex"),
    ]
});

static LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"plugin:([^:)]+)").expect("hardcoded regex"));

/// Who caused an observed action. Never partially confident.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Attribution {
    Extension(String),
    Core,
    Unknown,
}

impl Attribution {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Extension(id) => id.as_str(),
            Self::Core => CORE_TAG,
            Self::Unknown => UNKNOWN_TAG,
        }
    }

    /// Parses a stored identity. Empty input maps to `Unknown` so an origin is never blank.
    pub fn from_tag(input: &str) -> Self {
        match input.trim() {
            "" | UNKNOWN_TAG => Self::Unknown,
            CORE_TAG | HOST_CORE_ID => Self::Core,
            other => Self::Extension(other.to_string()),
        }
    }

    pub fn is_extension(&self) -> bool {
        matches!(self, Self::Extension(_))
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Self::Extension(id) if id == SELF_EXTENSION_ID)
    }

    pub fn extension_id(&self) -> Option<&str> {
        match self {
            Self::Extension(id) => Some(id.as_str()),
            Self::Core | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for Attribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Attribution {
    fn from(value: String) -> Self {
        Self::from_tag(&value)
    }
}

impl From<Attribution> for String {
    fn from(value: Attribution) -> Self {
        value.as_str().to_string()
    }
}

/// Source of the current call stack, rendered in the host's trace notation.
pub trait StackCapture {
    fn capture(&self) -> Option<String>;
}

/// Captures the native Rust backtrace. Useful when extensions are compiled in
/// and their frames carry recognizable module paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct BacktraceCapture;

impl StackCapture for BacktraceCapture {
    fn capture(&self) -> Option<String> {
        let trace = Backtrace::force_capture().to_string();
        if trace.trim().is_empty() {
            return None;
        }
        Some(format!("Error\n{trace}"))
    }
}

/// Classifies a captured stack trace into an [`Attribution`].
///
/// The classifier is a pure function of its input. `debug` only turns on
/// diagnostic events carrying the raw and filtered trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct StackAttributor {
    debug: bool,
}

impl StackAttributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(debug: bool) -> Self {
        Self { debug }
    }

    pub fn attribute(&self, stack: Option<&str>) -> Attribution {
        let Some(stack) = stack.filter(|raw| !raw.is_empty()) else {
            return Attribution::Unknown;
        };

        if self.debug {
            debug!(target: "extwatch::attribution", stack, "raw stack");
        }

        let filtered = filter_self_frames(stack);
        if self.debug {
            debug!(target: "extwatch::attribution", stack = %filtered, "filtered stack");
        }

        if let Some(found) = match_frame_patterns(&filtered) {
            return found;
        }

        if is_core_operation(&filtered) {
            return Attribution::Core;
        }

        scan_original_stack(stack)
    }
}

fn filter_self_frames(stack: &str) -> String {
    stack
        .split('\n')
        .filter(|line| !line.contains(SELF_EXTENSION_ID))
        .collect::<Vec<_>>()
        .join("\n")
}

fn match_frame_patterns(filtered: &str) -> Option<Attribution> {
    FRAME_PATTERNS.iter().find_map(|pattern| {
        let candidate = pattern.captures(filtered)?.get(1)?.as_str();
        is_valid_candidate(candidate).then(|| normalize_candidate(candidate))
    })
}

fn is_valid_candidate(candidate: &str) -> bool {
    candidate != SELF_EXTENSION_ID && !candidate.contains(INVALID_SENTINEL)
}

fn normalize_candidate(candidate: &str) -> Attribution {
    if candidate == HOST_CORE_ID {
        Attribution::Core
    } else {
        Attribution::Extension(candidate.to_string())
    }
}

fn is_core_operation(filtered: &str) -> bool {
    CORE_HINTS.iter().any(|hint| filtered.contains(hint))
}

fn scan_original_stack(stack: &str) -> Attribution {
    // The first line is the "Error" header.
    let frames = stack.split('\n').skip(1).collect::<Vec<_>>();

    for line in &frames {
        let Some(candidate) = LINE_PATTERN
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
        else {
            continue;
        };
        if is_valid_candidate(candidate) {
            return normalize_candidate(candidate);
        }
    }

    let only_host_or_self = frames.iter().all(|line| {
        line.contains(HOST_BUNDLE_MARKER)
            || line.contains(SELF_EXTENSION_ID)
            || line.trim().is_empty()
    });
    if only_host_or_self {
        Attribution::Core
    } else {
        Attribution::Unknown
    }
}
