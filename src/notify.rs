//! Operator notification queue and dispatcher.
//!
//! The capture loop never waits on chat I/O: finalized media and status
//! text go into a bounded queue, and a dedicated blocking worker drains
//! it. When the queue fills, the oldest pending notification is dropped
//! with a counted warning rather than blocking the loop. Delivery gets
//! at most one retry; persistent transport failure is logged and the
//! message is abandoned.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DeliveryError;

/// Chat transport boundary. The single pre-authorized operator identity
/// is the implementation's concern, not the engine's.
pub trait Notifier: Send + 'static {
    fn send_photo(&self, path: &PathBuf, caption: &str) -> Result<(), DeliveryError>;
    fn send_video(&self, path: &PathBuf, caption: &str) -> Result<(), DeliveryError>;
    fn send_text(&self, message: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Photo { path: PathBuf, caption: String },
    Video { path: PathBuf, caption: String },
    Text(String),
}

/// Bounded notification queue with a drop-oldest overflow policy.
pub struct NotifyQueue {
    tx: flume::Sender<Notification>,
    rx: flume::Receiver<Notification>,
    dropped: Arc<AtomicU64>,
}

impl NotifyQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues without blocking. On a full queue the oldest pending
    /// notification is discarded to make room.
    pub fn push(&self, notification: Notification) {
        if self.tx.is_full() {
            if self.rx.try_recv().is_ok() {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Notification queue full, dropped oldest ({} dropped so far)", n);
            }
        }
        // Only fails if the dispatcher side is gone, nothing left to do then.
        let _ = self.tx.try_send(notification);
    }

    pub fn receiver(&self) -> flume::Receiver<Notification> {
        self.rx.clone()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared counter handle, read by the engine for its stats snapshot.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

fn deliver(notifier: &dyn Notifier, notification: &Notification) -> Result<(), DeliveryError> {
    match notification {
        Notification::Photo { path, caption } => notifier.send_photo(path, caption),
        Notification::Video { path, caption } => notifier.send_video(path, caption),
        Notification::Text(message) => notifier.send_text(message),
    }
}

/// Spawns the blocking dispatcher worker. It drains the queue until every
/// sender is dropped, then exits; the returned handle yields the number
/// of notifications abandoned after the retry.
pub fn spawn_dispatcher(
    notifier: Box<dyn Notifier>,
    rx: flume::Receiver<Notification>,
) -> tokio::task::JoinHandle<u64> {
    tokio::task::spawn_blocking(move || {
        let mut failed = 0u64;
        while let Ok(notification) = rx.recv() {
            match deliver(notifier.as_ref(), &notification) {
                Ok(()) => debug!("Notification delivered"),
                Err(first) => {
                    warn!("Delivery failed ({}), retrying once", first);
                    if let Err(second) = deliver(notifier.as_ref(), &notification) {
                        warn!("Retry failed ({}), dropping notification", second);
                        failed += 1;
                    }
                }
            }
        }
        debug!("Notification dispatcher exited");
        failed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
        fail_first: Arc<AtomicU64>,
    }

    impl Notifier for RecordingNotifier {
        fn send_photo(&self, path: &PathBuf, caption: &str) -> Result<(), DeliveryError> {
            self.record(format!("photo:{}:{}", path.display(), caption))
        }
        fn send_video(&self, path: &PathBuf, caption: &str) -> Result<(), DeliveryError> {
            self.record(format!("video:{}:{}", path.display(), caption))
        }
        fn send_text(&self, message: &str) -> Result<(), DeliveryError> {
            self.record(format!("text:{}", message))
        }
    }

    impl RecordingNotifier {
        fn record(&self, entry: String) -> Result<(), DeliveryError> {
            if self.fail_first.load(Ordering::Relaxed) > 0 {
                self.fail_first.fetch_sub(1, Ordering::Relaxed);
                return Err(DeliveryError::Transport("down".into()));
            }
            self.sent.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn queue(capacity: usize) -> NotifyQueue {
        NotifyQueue::new(capacity)
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let q = queue(2);
        q.push(Notification::Text("one".into()));
        q.push(Notification::Text("two".into()));
        q.push(Notification::Text("three".into()));

        assert_eq!(q.dropped(), 1);
        assert_eq!(q.receiver().try_recv().unwrap(), Notification::Text("two".into()));
        assert_eq!(q.receiver().try_recv().unwrap(), Notification::Text("three".into()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatcher_drains_queue_in_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            sent: sent.clone(),
            ..Default::default()
        };

        let q = queue(8);
        let handle = spawn_dispatcher(Box::new(notifier), q.receiver());

        q.push(Notification::Text("hello".into()));
        q.push(Notification::Photo {
            path: PathBuf::from("/tmp/a.jpg"),
            caption: "1/6".into(),
        });
        drop(q);

        let failed = handle.await.unwrap();
        assert_eq!(failed, 0);
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["text:hello".to_string(), "photo:/tmp/a.jpg:1/6".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatcher_retries_once_then_gives_up() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        // First delivery fails, the single retry succeeds.
        let notifier = RecordingNotifier {
            sent: sent.clone(),
            fail_first: Arc::new(AtomicU64::new(1)),
        };
        let q = queue(8);
        let handle = spawn_dispatcher(Box::new(notifier), q.receiver());
        q.push(Notification::Text("retry me".into()));
        drop(q);
        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(*sent.lock().unwrap(), vec!["text:retry me".to_string()]);

        // Two consecutive failures abandon the message.
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = RecordingNotifier {
            sent: sent.clone(),
            fail_first: Arc::new(AtomicU64::new(2)),
        };
        let q = queue(8);
        let handle = spawn_dispatcher(Box::new(notifier), q.receiver());
        q.push(Notification::Text("lost".into()));
        drop(q);
        assert_eq!(handle.await.unwrap(), 1);
        assert!(sent.lock().unwrap().is_empty());
    }
}
