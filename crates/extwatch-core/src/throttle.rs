use std::collections::HashMap;

pub const DEDUP_WINDOW_MS: u64 = 5_000;
pub const MAX_REPEAT_COUNT: u32 = 3;
pub const CLEANUP_INTERVAL_MS: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub window_ms: u64,
    pub max_repeat: u32,
    pub cleanup_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: DEDUP_WINDOW_MS,
            max_repeat: MAX_REPEAT_COUNT,
            cleanup_interval_ms: CLEANUP_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleEntry {
    pub count: u32,
    pub window_start_ms: u64,
    pub last_seen_ms: u64,
}

/// Repeat metadata attached to the one grouped record per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grouping {
    pub is_grouped: bool,
    pub repeat_count: u32,
    pub time_span_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Record,
    RecordGrouped(Grouping),
    Suppress,
}

impl ThrottleDecision {
    pub fn should_record(&self) -> bool {
        !matches!(self, Self::Suppress)
    }

    pub fn grouping(&self) -> Option<Grouping> {
        match self {
            Self::RecordGrouped(grouping) => Some(*grouping),
            Self::Record | Self::Suppress => None,
        }
    }
}

pub fn request_key(identity: &str, method: &str, url: &str) -> String {
    format!("{identity}:{method}:{url}")
}

/// Per-key repeat counter over a fixed window.
///
/// Within one window the first `max_repeat` requests are recorded, the next one
/// is recorded as a grouped summary, and the rest are dropped. A request seen
/// after the window has elapsed starts a fresh window.
#[derive(Debug, Default)]
pub struct RequestThrottle {
    config: ThrottleConfig,
    entries: HashMap<String, ThrottleEntry>,
}

impl RequestThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    pub fn check(&mut self, key: &str, now_ms: u64) -> ThrottleDecision {
        let window_ms = self.config.window_ms;
        let entry = self
            .entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if now_ms.saturating_sub(entry.window_start_ms) > window_ms {
                    *entry = ThrottleEntry {
                        count: 0,
                        window_start_ms: now_ms,
                        last_seen_ms: now_ms,
                    };
                }
            })
            .or_insert(ThrottleEntry {
                count: 0,
                window_start_ms: now_ms,
                last_seen_ms: now_ms,
            });

        entry.count += 1;
        entry.last_seen_ms = now_ms;

        let max = self.config.max_repeat;
        if entry.count <= max {
            ThrottleDecision::Record
        } else if entry.count == max + 1 {
            ThrottleDecision::RecordGrouped(Grouping {
                is_grouped: true,
                repeat_count: entry.count,
                time_span_ms: entry.last_seen_ms - entry.window_start_ms,
            })
        } else {
            ThrottleDecision::Suppress
        }
    }

    pub fn should_record(&mut self, key: &str, now_ms: u64) -> bool {
        self.check(key, now_ms).should_record()
    }

    /// Current repeat metadata for `key` without counting a new request.
    pub fn describe_grouping(&self, key: &str) -> Option<Grouping> {
        let entry = self.entries.get(key)?;
        Some(Grouping {
            is_grouped: entry.count > self.config.max_repeat,
            repeat_count: entry.count,
            time_span_ms: entry.last_seen_ms - entry.window_start_ms,
        })
    }

    /// Drops entries idle for more than two windows. Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.config.window_ms * 2);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen_ms >= cutoff);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &str) -> Option<&ThrottleEntry> {
        self.entries.get(key)
    }
}
