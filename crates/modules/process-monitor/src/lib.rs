//! Process lifecycle monitoring pipeline.
//!
//! Three stages connected by bounded queues: a read stage producing raw
//! notices from a kernel trace session (or a polling fallback), a parse
//! stage enriching them into finished events, and an emit stage fanning
//! events out to the configured sinks. Backpressure propagates from the
//! sinks back to the source; a full queue slows the reader down instead
//! of growing memory.

use std::{sync::Arc, time::Duration};

use procaudit_core::{
    event::Event,
    process::{
        CorrelationCache, ProcessFilter, ProcessInspector, ProcessTree, DEFAULT_CACHE_CAPACITY,
        DEFAULT_CACHE_TTL,
    },
    shutdown::{CleanExit, ShutdownSignal},
    sink::{EventSink, SinkError},
    source::{RawNotice, TraceCapability},
    Pid,
};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod parse;
pub mod poll;
pub mod trace;

pub use parse::ParseStage;
pub use poll::{PollEventSource, DEFAULT_POLL_INTERVAL};
pub use trace::{TraceEventSource, DEFAULT_ACQUIRE_TIMEOUT};

pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of each inter-stage queue.
    pub queue_size: usize,
    /// Snapshot interval of the polling fallback.
    pub poll_interval: Duration,
    /// Bound on trace session acquisition.
    pub acquire_timeout: Duration,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Neither the trace source nor the polling fallback could start.
    #[error("no usable event source (trace: {trace}; poll: {poll})")]
    NoSource { trace: String, poll: String },
    #[error("pipeline stage aborted: {0}")]
    Stage(#[from] tokio::task::JoinError),
}

/// The monitoring pipeline, wired at startup and consumed by [`run`].
///
/// [`run`]: EventPipeline::run
pub struct EventPipeline {
    inspector: Arc<dyn ProcessInspector>,
    filter: ProcessFilter,
    trace: Option<Arc<dyn TraceCapability>>,
    sinks: Vec<Box<dyn EventSink>>,
    config: PipelineConfig,
}

impl EventPipeline {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            inspector,
            filter: ProcessFilter::new(),
            trace: None,
            sinks: Vec::new(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_filter(mut self, filter: ProcessFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_trace_capability(mut self, capability: Arc<dyn TraceCapability>) -> Self {
        self.trace = Some(capability);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run until the shutdown signal fires or no event source remains.
    ///
    /// On cancellation the reader stops immediately, the parse stage
    /// stops accepting queued notices, and the emit stage drains the
    /// events already parsed before returning.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<CleanExit, PipelineError> {
        let (raw_tx, raw_rx) = mpsc::channel(self.config.queue_size);
        let (event_tx, event_rx) = mpsc::channel(self.config.queue_size);

        let mut cache =
            CorrelationCache::with_settings(self.config.cache_capacity, self.config.cache_ttl);
        let mut tree = ProcessTree::new();
        match self.inspector.list_all() {
            Ok(snapshot) => {
                let edges: Vec<(Pid, Pid)> = snapshot
                    .iter()
                    .filter_map(|record| record.ppid.map(|ppid| (record.pid, ppid)))
                    .collect();
                cache.seed(edges.iter().copied());
                tree = ProcessTree::from_edges(edges);
                log::debug!("correlation state seeded with {} processes", cache.len());
            }
            Err(e) => {
                log::warn!("initial process snapshot failed, starting with empty correlation state: {e}");
            }
        }
        let parser = ParseStage::new(self.filter, self.inspector.clone(), cache, tree);
        let slots = self.sinks.into_iter().map(SinkSlot::new).collect();

        let read = tokio::spawn(read_stage(
            self.trace,
            self.inspector,
            self.config,
            raw_tx,
            shutdown.clone(),
        ));
        let parse = tokio::spawn(parse_stage(parser, raw_rx, event_tx, shutdown));
        let emit = tokio::spawn(emit_stage(slots, event_rx));

        let (read, parse, emit) = tokio::join!(read, parse, emit);
        parse?;
        emit?;
        read?
    }
}

/// Produce raw notices from the trace session, falling back to polling
/// when the session cannot be acquired or fails mid-run. Only when both
/// sources are unusable does the pipeline give up.
async fn read_stage(
    trace: Option<Arc<dyn TraceCapability>>,
    inspector: Arc<dyn ProcessInspector>,
    config: PipelineConfig,
    tx: mpsc::Sender<RawNotice>,
    shutdown: ShutdownSignal,
) -> Result<CleanExit, PipelineError> {
    let trace_failure = match &trace {
        Some(capability) => {
            match TraceEventSource::start(capability.as_ref(), config.acquire_timeout).await {
                Ok(source) => match source.run(tx.clone(), shutdown.clone()).await {
                    Ok(exit) => return Ok(exit),
                    Err(e) => {
                        log::warn!("trace source failed, falling back to polling: {e}");
                        e.to_string()
                    }
                },
                Err(e) => {
                    log::warn!("trace source unavailable, falling back to polling: {e}");
                    e.to_string()
                }
            }
        }
        None => {
            log::info!("no trace capability registered, using the polling source");
            "no trace capability registered".to_string()
        }
    };

    let poll = PollEventSource::new(inspector, config.poll_interval).map_err(|e| {
        PipelineError::NoSource {
            trace: trace_failure,
            poll: e.to_string(),
        }
    })?;
    Ok(poll.run(tx, shutdown).await)
}

/// Single consumer of raw notices; owns the correlation state. Stops
/// accepting input on the shutdown signal and closes the event queue by
/// dropping its sender.
async fn parse_stage(
    mut parser: ParseStage,
    mut rx: mpsc::Receiver<RawNotice>,
    tx: mpsc::Sender<Event>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let notice = tokio::select! {
            _ = shutdown.recv() => return,
            notice = rx.recv() => match notice {
                Some(notice) => notice,
                None => return,
            }
        };
        if let Some(event) = parser.process(notice) {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

struct SinkSlot {
    sink: Box<dyn EventSink>,
    disabled: bool,
}

impl SinkSlot {
    fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink,
            disabled: false,
        }
    }
}

/// Fan each event out to every enabled sink, in registration order. One
/// sink's failure never affects another: a transient error drops the
/// event for that sink, a permanent error disables the sink for the
/// rest of the run. Drains the queue before returning, so cancellation
/// never abandons an already-parsed event.
async fn emit_stage(mut slots: Vec<SinkSlot>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        for slot in &mut slots {
            if slot.disabled {
                continue;
            }
            match slot.sink.write(&event).await {
                Ok(()) => {}
                Err(SinkError::Transient(e)) => {
                    log::warn!(
                        "sink {} dropped event {}: {e}",
                        slot.sink.name(),
                        event.header().id
                    );
                }
                Err(SinkError::Permanent(e)) => {
                    log::error!(
                        "sink {} disabled for the rest of the run: {e}",
                        slot.sink.name()
                    );
                    slot.disabled = true;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use procaudit_core::{
        event::EventType,
        source::{fields, NoticeKind},
    };

    use super::*;
    use crate::test_support::{BrokenSink, CollectSink, FakeInspector, ScriptedCapability};

    async fn wait_for_events(events: &Arc<Mutex<Vec<Event>>>, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if events.lock().unwrap().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("events did not arrive in time")
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(10),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn trace_events_flow_to_the_sinks() {
        let capability = Arc::new(ScriptedCapability::with_notices(vec![
            RawNotice::new(5, NoticeKind::Start).with_field(fields::PPID, "1"),
            RawNotice::new(6, NoticeKind::Start).with_field(fields::PPID, "5"),
            RawNotice::new(6, NoticeKind::Stop),
            RawNotice::new(5, NoticeKind::Stop),
        ]));
        let (sink, events) = CollectSink::new();
        let pipeline = EventPipeline::new(Arc::new(FakeInspector::default()))
            .with_trace_capability(capability)
            .with_sink(Box::new(sink));

        let (sender, shutdown) = ShutdownSignal::new();
        let task = tokio::spawn(pipeline.run(shutdown));

        wait_for_events(&events, 4).await;
        sender.send_signal();
        // Cancellation completes in bounded time.
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);

        // Run-unique ids.
        let mut ids: Vec<_> = events.iter().map(|e| e.header().id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);

        // The stop notices carried no parent; correlation backfills it.
        let stop_of_5 = events
            .iter()
            .find(|e| e.pid() == 5 && e.header().event_type == EventType::Stopped)
            .unwrap();
        assert_eq!(stop_of_5.ppid(), Some(1));
        let stop_of_6 = events
            .iter()
            .find(|e| e.pid() == 6 && e.header().event_type == EventType::Stopped)
            .unwrap();
        assert_eq!(stop_of_6.ppid(), Some(5));
    }

    #[tokio::test]
    async fn falls_back_to_polling_when_the_trace_source_is_unavailable() {
        let inspector = Arc::new(FakeInspector::default());
        inspector.insert(1, None, "init");
        let (sink, events) = CollectSink::new();
        let pipeline = EventPipeline::new(inspector.clone())
            .with_config(fast_config())
            .with_trace_capability(Arc::new(ScriptedCapability::unavailable("no provider")))
            .with_sink(Box::new(sink));

        let (sender, shutdown) = ShutdownSignal::new();
        let task = tokio::spawn(pipeline.run(shutdown));

        // Let the fallback seed its snapshot before adding a process.
        tokio::time::sleep(Duration::from_millis(100)).await;
        inspector.insert(2, Some(1), "child");

        wait_for_events(&events, 1).await;
        sender.send_signal();
        task.await.unwrap().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0].pid(), 2);
        assert_eq!(events[0].ppid(), Some(1));
        assert_eq!(events[0].header().event_type, EventType::Started);
    }

    #[tokio::test]
    async fn a_mid_run_trace_failure_falls_back_to_polling() {
        let inspector = Arc::new(FakeInspector::default());
        inspector.insert(1, None, "init");
        let capability = Arc::new(
            ScriptedCapability::with_notices(vec![
                RawNotice::new(5, NoticeKind::Start).with_field(fields::PPID, "1")
            ])
            .fail_after_script(),
        );
        let (sink, events) = CollectSink::new();
        let pipeline = EventPipeline::new(inspector.clone())
            .with_config(fast_config())
            .with_trace_capability(capability)
            .with_sink(Box::new(sink));

        let (sender, shutdown) = ShutdownSignal::new();
        let task = tokio::spawn(pipeline.run(shutdown));

        wait_for_events(&events, 1).await;
        // Give the fallback time to seed, then add a process for it to
        // discover.
        tokio::time::sleep(Duration::from_millis(100)).await;
        inspector.insert(9, Some(1), "late");

        wait_for_events(&events, 2).await;
        sender.send_signal();
        task.await.unwrap().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0].pid(), 5);
        assert_eq!(events[1].pid(), 9);
    }

    #[tokio::test]
    async fn no_usable_source_is_fatal() {
        let inspector = Arc::new(FakeInspector::default());
        inspector.fail_listing(true);
        let pipeline = EventPipeline::new(inspector)
            .with_trace_capability(Arc::new(ScriptedCapability::unavailable("no provider")));

        let (_sender, shutdown) = ShutdownSignal::new();
        let err = pipeline.run(shutdown).await.err().unwrap();
        assert!(matches!(err, PipelineError::NoSource { .. }));
    }

    #[tokio::test]
    async fn a_permanently_failing_sink_does_not_affect_the_others() {
        let capability = Arc::new(ScriptedCapability::with_notices(vec![
            RawNotice::new(5, NoticeKind::Start).with_field(fields::PPID, "1"),
            RawNotice::new(6, NoticeKind::Start).with_field(fields::PPID, "1"),
            RawNotice::new(7, NoticeKind::Start).with_field(fields::PPID, "1"),
        ]));
        let (broken, attempts) = BrokenSink::new();
        let (sink, events) = CollectSink::new();
        let pipeline = EventPipeline::new(Arc::new(FakeInspector::default()))
            .with_trace_capability(capability)
            .with_sink(Box::new(broken))
            .with_sink(Box::new(sink));

        let (sender, shutdown) = ShutdownSignal::new();
        let task = tokio::spawn(pipeline.run(shutdown));

        wait_for_events(&events, 3).await;
        sender.send_signal();
        task.await.unwrap().unwrap();

        assert_eq!(events.lock().unwrap().len(), 3);
        // Disabled on the first failure, never retried.
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_filter_applies_to_every_source() {
        let capability = Arc::new(ScriptedCapability::with_notices(vec![
            RawNotice::new(5, NoticeKind::Start).with_field(fields::PPID, "1"),
            RawNotice::new(6, NoticeKind::Start).with_field(fields::PPID, "2"),
        ]));
        let mut filter = ProcessFilter::new();
        filter.add_ppids([1]);
        let (sink, events) = CollectSink::new();
        let pipeline = EventPipeline::new(Arc::new(FakeInspector::default()))
            .with_filter(filter)
            .with_trace_capability(capability)
            .with_sink(Box::new(sink));

        let (sender, shutdown) = ShutdownSignal::new();
        let task = tokio::spawn(pipeline.run(shutdown));

        wait_for_events(&events, 1).await;
        // The rejected notice never shows up however long we wait.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.send_signal();
        task.await.unwrap().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pid(), 5);
    }
}
