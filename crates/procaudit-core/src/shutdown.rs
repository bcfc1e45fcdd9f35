use tokio::sync::broadcast;

/// Witness that a stage unwound in response to the shutdown signal
/// rather than by failure.
#[derive(Debug)]
pub struct CleanExit(());

/// One cancellation signal fanned out to every pipeline stage. Each
/// clone observes the same signal; stages await `recv` at their
/// blocking points.
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
    rx: broadcast::Receiver<()>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownSender, ShutdownSignal) {
        let (tx, rx) = broadcast::channel(1);
        (ShutdownSender(tx.clone()), ShutdownSignal { tx, rx })
    }

    pub async fn recv(&mut self) -> CleanExit {
        let _ = self.rx.recv().await;
        CleanExit(())
    }
}

pub struct ShutdownSender(broadcast::Sender<()>);

impl ShutdownSender {
    pub fn send_signal(self) {
        let _ = self.0.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_reaches_every_clone() {
        let (sender, mut first) = ShutdownSignal::new();
        let mut second = first.clone();
        sender.send_signal();
        first.recv().await;
        second.recv().await;
    }

    #[tokio::test]
    async fn recv_unblocks_a_pending_waiter() {
        let (sender, mut signal) = ShutdownSignal::new();
        let waiter = tokio::spawn(async move { signal.recv().await });
        sender.send_signal();
        waiter.await.unwrap();
    }
}
