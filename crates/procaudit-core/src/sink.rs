use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;

/// A sink write failure, classified by how the emit stage should react.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The event is dropped for this sink only; no internal retry.
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// The sink is disabled for the rest of the run; other sinks
    /// continue.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn transient(err: impl ToString) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn permanent(err: impl ToString) -> Self {
        Self::Permanent(err.to_string())
    }
}

/// A delivery destination for finished events.
#[async_trait]
pub trait EventSink: Send {
    fn name(&self) -> &str;

    /// Deliver one event. A returning `write` leaves no partial record
    /// behind, whatever the outcome.
    async fn write(&mut self, event: &Event) -> Result<(), SinkError>;
}
