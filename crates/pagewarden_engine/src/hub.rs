//! Live event fan-out.
//!
//! One broadcast channel carries every published event. All-partition
//! subscribers read it directly; per-partition subscriptions run through a
//! small forwarding task that filters on the key (keepalives always pass).
//! A timer publishes `keepalive` events while the hub is idle so that
//! long-polling subscribers can tell a quiet scan from a dead one.

use pagewarden_protocol::{ScanEvent, ScanEventKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct StreamHub {
    tx: broadcast::Sender<ScanEvent>,
    last_publish: Arc<Mutex<Instant>>,
}

impl StreamHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            last_publish: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Push one event to every live subscriber. Lagging or disconnected
    /// subscribers never block the publisher.
    pub fn publish(&self, event: ScanEvent) {
        if event.kind != ScanEventKind::Keepalive {
            *self.last_publish.lock().expect("hub clock lock poisoned") = Instant::now();
        }
        let _ = self.tx.send(event);
    }

    /// Subscribe to every partition of every scan.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to one partition. Keepalives are delivered regardless of
    /// their partition key.
    pub fn subscribe_partition(&self, key: &str) -> mpsc::UnboundedReceiver<ScanEvent> {
        let key = key.to_string();
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let matches = event.kind == ScanEventKind::Keepalive
                            || event.partition_key.as_str() == key;
                        if matches && out_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        out_rx
    }

    /// Spawn the idle-keepalive timer. Ticks while no real event has been
    /// published for a full interval. Keepalives are stream-only and never
    /// reach the log.
    pub fn spawn_keepalive(&self, interval: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let idle = hub
                    .last_publish
                    .lock()
                    .expect("hub clock lock poisoned")
                    .elapsed()
                    >= interval;
                if idle && hub.tx.receiver_count() > 0 {
                    // "*" sentinels keep subscriber-side id filters from
                    // ever matching a real scan or partition.
                    let _ = hub.tx.send(ScanEvent::new(
                        "*".into(),
                        "*".into(),
                        ScanEventKind::Keepalive,
                    ));
                }
            }
        })
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn partition_subscription_filters_other_keys() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe_partition("OPS");
        hub.publish(ScanEvent::new("s1".into(), "HR".into(), ScanEventKind::Start));
        hub.publish(ScanEvent::new("s1".into(), "OPS".into(), ScanEventKind::Start));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.partition_key.as_str(), "OPS");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_hub_emits_keepalives() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe_all();
        let timer = hub.spawn_keepalive(Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(16)).await;
        tokio::task::yield_now().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ScanEventKind::Keepalive);
        // Sentinels, never a real scan or partition.
        assert_eq!(event.scan_id.as_str(), "*");
        assert_eq!(event.partition_key.as_str(), "*");
        timer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn busy_hub_stays_quiet() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe_all();
        let timer = hub.spawn_keepalive(Duration::from_secs(15));

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10)).await;
            tokio::task::yield_now().await;
            hub.publish(ScanEvent::new("s1".into(), "OPS".into(), ScanEventKind::Item));
        }

        let mut keepalives = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind == ScanEventKind::Keepalive {
                keepalives += 1;
            }
        }
        assert_eq!(keepalives, 0);
        timer.abort();
    }
}
