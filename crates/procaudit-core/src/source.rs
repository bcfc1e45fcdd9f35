use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Pid;

/// Well-known keys of [`RawNotice::fields`].
pub mod fields {
    pub const PPID: &str = "ppid";
    pub const CREATE_TIME: &str = "create_time";
    pub const EXIT_TIME: &str = "exit_time";
    pub const EXIT_CODE: &str = "exit_code";
}

/// An unparsed process lifecycle signal from a trace or poll source.
#[derive(Debug, Clone)]
pub struct RawNotice {
    pub pid: Pid,
    pub kind: NoticeKind,
    /// Source-provided timestamp; the parse stage falls back to the
    /// current time when absent.
    pub time: Option<DateTime<Utc>>,
    pub fields: HashMap<String, String>,
}

impl RawNotice {
    pub fn new(pid: Pid, kind: NoticeKind) -> Self {
        Self {
            pid,
            kind,
            time: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Event kind as reported by the source. Kernel providers emit more
/// kinds than the pipeline consumes; unknown ones are dropped at parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Start,
    Stop,
    Other(u32),
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// The tracing facility cannot be acquired or has failed for the
    /// run. Fatal to the source; triggers fallback.
    #[error("trace source unavailable: {0}")]
    Unavailable(String),
    /// A session with our name already exists, presumably left behind
    /// by a previous run.
    #[error("trace session name collision")]
    SessionConflict,
    /// The session was torn down; no further notices will be observed.
    #[error("trace session closed")]
    Closed,
}

/// A live kernel process-tracing session yielding raw notices until
/// closed.
#[async_trait]
pub trait TraceSession: Send {
    /// Wait for the next raw notice. Returns [`SourceError::Closed`]
    /// once the session is torn down.
    async fn next_notice(&mut self) -> Result<RawNotice, SourceError>;

    /// Tear the session down. Deterministic and idempotent.
    async fn close(&mut self);
}

/// Acquisition of the OS process-tracing facility. Platform-specific
/// and external to the pipeline, which only consumes the session.
#[async_trait]
pub trait TraceCapability: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn TraceSession>, SourceError>;

    /// Terminate a stale session left behind by a previous run so that
    /// `open_session` can be retried once.
    async fn reclaim_stale_session(&self) -> Result<(), SourceError>;
}
