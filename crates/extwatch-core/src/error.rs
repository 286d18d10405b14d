use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentErrorCode {
    SinkUnavailable,
    StateBusy,
    Panicked,
}

impl InstrumentErrorCode {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::SinkUnavailable => "sink_unavailable",
            Self::StateBusy => "state_busy",
            Self::Panicked => "panicked",
        }
    }
}

/// Fault raised by the watcher's own bookkeeping inside a wrapper.
///
/// These never reach the caller of a wrapped host function; the guard in
/// [`crate::monitor::instrument`] reports them on the diagnostic channel.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{}: {}", .code.as_tag(), .detail)]
pub struct InstrumentError {
    pub code: InstrumentErrorCode,
    pub detail: String,
}

impl InstrumentError {
    pub fn new(code: InstrumentErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn busy(what: &str) -> Self {
        Self::new(
            InstrumentErrorCode::StateBusy,
            format!("{what} is already borrowed"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_code_tag() {
        let err = InstrumentError::new(InstrumentErrorCode::SinkUnavailable, "log dropped");
        assert_eq!(err.to_string(), "sink_unavailable: log dropped");
    }

    #[test]
    fn busy_names_the_borrowed_state() {
        let err = InstrumentError::busy("request throttle");
        assert_eq!(err.code, InstrumentErrorCode::StateBusy);
        assert!(err.detail.contains("request throttle"));
    }
}
