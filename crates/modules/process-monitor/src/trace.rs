use std::time::Duration;

use procaudit_core::{
    shutdown::{CleanExit, ShutdownSignal},
    source::{RawNotice, SourceError, TraceCapability, TraceSession},
};
use tokio::sync::mpsc;

/// Bound on kernel-session acquisition, so a misbehaving tracing API
/// cannot hang the pipeline instead of letting it fall back to polling.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary event source: a live kernel trace session.
pub struct TraceEventSource {
    session: Box<dyn TraceSession>,
}

impl TraceEventSource {
    /// Acquire the tracing facility. On a session-name collision the
    /// stale session is reclaimed and acquisition retried exactly once;
    /// any other failure, including a timeout, is `Unavailable`.
    pub async fn start(
        capability: &dyn TraceCapability,
        acquire_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let session = match open_with_timeout(capability, acquire_timeout).await {
            Ok(session) => session,
            Err(SourceError::SessionConflict) => {
                log::warn!("stale trace session found, reclaiming and retrying once");
                capability.reclaim_stale_session().await?;
                open_with_timeout(capability, acquire_timeout).await?
            }
            Err(e) => return Err(e),
        };
        log::info!("trace session acquired");
        Ok(Self { session })
    }

    /// Forward raw notices until cancellation or session failure. No
    /// notice is forwarded after the shutdown signal is observed, and
    /// the session is torn down on every exit path.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<RawNotice>,
        mut shutdown: ShutdownSignal,
    ) -> Result<CleanExit, SourceError> {
        loop {
            let notice = tokio::select! {
                exit = shutdown.recv() => {
                    self.session.close().await;
                    return Ok(exit);
                }
                notice = self.session.next_notice() => match notice {
                    Ok(notice) => notice,
                    Err(e) => {
                        self.session.close().await;
                        return Err(e);
                    }
                }
            };
            tokio::select! {
                exit = shutdown.recv() => {
                    self.session.close().await;
                    return Ok(exit);
                }
                sent = tx.send(notice) => {
                    if sent.is_err() {
                        self.session.close().await;
                        return Ok(shutdown.recv().await);
                    }
                }
            }
        }
    }
}

async fn open_with_timeout(
    capability: &dyn TraceCapability,
    acquire_timeout: Duration,
) -> Result<Box<dyn TraceSession>, SourceError> {
    match tokio::time::timeout(acquire_timeout, capability.open_session()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Unavailable(format!(
            "session acquisition timed out after {acquire_timeout:?}"
        ))),
    }
}
