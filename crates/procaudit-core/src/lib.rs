//! Core building blocks for the procaudit event pipeline.
//!
//! This crate holds the canonical [event](event) schema, the process
//! ancestry structures ([`process::ProcessTree`], [`process::ProcessFilter`],
//! [`process::CorrelationCache`]), the collaborator interfaces consumed by
//! the pipeline ([`process::ProcessInspector`], [`source::TraceCapability`],
//! [`sink::EventSink`]) and the shared [shutdown](shutdown) primitive.
//!
//! The pipeline itself lives in the `process-monitor` module crate; the
//! sink implementations live in `event-logger` and `amqp-notifier`.

pub mod event;
pub mod host;
pub mod process;
pub mod shutdown;
pub mod sink;
pub mod source;

/// Raw OS process identifier.
pub type Pid = i32;
