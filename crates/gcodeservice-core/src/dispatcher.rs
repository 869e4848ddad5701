//! Callback dispatcher
//!
//! Events are published onto an unbounded channel and delivered by a single
//! dedicated task to whichever subscriber is registered at delivery time.
//! Publishing never waits for the subscriber, so a slow handler cannot stall
//! command dispatch or line ingestion.

use crate::event::ServiceEvent;
use crate::listener::{EventSubscriber, FnSubscriber};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type SharedSubscriber = Arc<dyn EventSubscriber>;

struct Envelope {
    event: ServiceEvent,
    delivered: Option<oneshot::Sender<()>>,
}

/// Cheap, cloneable handle used by workers to publish events
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventPublisher {
    /// Queue an event for delivery. Never blocks.
    pub fn trigger(&self, event: ServiceEvent) {
        tracing::trace!("trigger {}", event);
        let envelope = Envelope {
            event,
            delivered: None,
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!("Callback dispatcher is gone, event dropped");
        }
    }

    /// Queue an event and wait until the subscriber has returned from it
    ///
    /// Also returns when no subscriber is registered or the dispatcher is gone.
    pub async fn deliver(&self, event: ServiceEvent) {
        tracing::trace!("deliver {}", event);
        let (done_tx, done_rx) = oneshot::channel();
        let envelope = Envelope {
            event,
            delivered: Some(done_tx),
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!("Callback dispatcher is gone, event dropped");
            return;
        }
        let _ = done_rx.await;
    }
}

/// Single-subscriber event dispatcher
pub struct CallbackDispatcher {
    publisher: EventPublisher,
    subscriber: Arc<RwLock<Option<SharedSubscriber>>>,
    task: JoinHandle<()>,
}

impl CallbackDispatcher {
    /// Start the dispatch task
    ///
    /// Must be called from within a tokio runtime. The task exits once every
    /// [`EventPublisher`] (including the dispatcher's own) has been dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let subscriber: Arc<RwLock<Option<SharedSubscriber>>> = Arc::new(RwLock::new(None));
        let current = subscriber.clone();

        let task = tokio::spawn(async move {
            while let Some(Envelope { event, delivered }) = rx.recv().await {
                let target = current.read().clone();
                match target {
                    Some(target) => target.on_event(event).await,
                    None => tracing::trace!("No subscriber registered, dropping {}", event),
                }
                if let Some(done) = delivered {
                    let _ = done.send(());
                }
            }
            tracing::debug!("Callback dispatcher stopped");
        });

        Self {
            publisher: EventPublisher { tx },
            subscriber,
            task,
        }
    }

    /// Handle for publishing from other tasks and threads
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Publish an event
    pub fn trigger(&self, event: ServiceEvent) {
        self.publisher.trigger(event);
    }

    /// Install the subscriber, replacing any previous one
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        let replaced = self.subscriber.write().replace(subscriber).is_some();
        if replaced {
            tracing::debug!("Callback subscriber replaced");
        } else {
            tracing::debug!("Callback subscriber registered");
        }
    }

    /// Install a closure as the subscriber
    pub fn register_fn<F>(&self, handler: F)
    where
        F: Fn(ServiceEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(FnSubscriber::new(handler)));
    }

    /// Remove the subscriber; later events are dropped
    pub fn unregister(&self) {
        if self.subscriber.write().take().is_some() {
            tracing::debug!("Callback subscriber removed");
        }
    }

    /// Whether a subscriber is installed
    pub fn has_subscriber(&self) -> bool {
        self.subscriber.read().is_some()
    }

    /// Whether the dispatch task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("has_subscriber", &self.has_subscriber())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StateChange;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Recorder {
        names: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        async fn on_event(&self, event: ServiceEvent) {
            self.names.lock().await.push(event.name());
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let dispatcher = CallbackDispatcher::spawn();
        let names = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(Arc::new(Recorder {
            names: names.clone(),
        }));

        dispatcher.trigger(ServiceEvent::FirstMove);
        dispatcher.trigger(ServiceEvent::StateChange(StateChange::Paused));
        dispatcher.trigger(ServiceEvent::FileDone);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let g = names.lock().await;
        assert_eq!(*g, vec!["first_move", "state_change", "file_done"]);
    }

    #[tokio::test]
    async fn test_register_replaces_subscriber() {
        let dispatcher = CallbackDispatcher::spawn();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        dispatcher.register_fn(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        dispatcher.register_fn(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.trigger(ServiceEvent::FileDone);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_drops_events() {
        let dispatcher = CallbackDispatcher::spawn();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        dispatcher.register_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(dispatcher.has_subscriber());

        dispatcher.unregister();
        assert!(!dispatcher.has_subscriber());

        dispatcher.trigger(ServiceEvent::FileDone);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deliver_waits_for_subscriber() {
        let dispatcher = CallbackDispatcher::spawn();
        let publisher = dispatcher.publisher();

        // no subscriber: returns right away
        publisher.deliver(ServiceEvent::FileDone).await;

        let handled = Arc::new(AtomicUsize::new(0));
        let h = handled.clone();
        dispatcher.register_fn(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            h.fetch_add(1, Ordering::SeqCst);
        });

        publisher.trigger(ServiceEvent::FirstMove);
        publisher.deliver(ServiceEvent::FileDone).await;
        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_publisher() {
        let dispatcher = CallbackDispatcher::spawn();
        dispatcher.register_fn(|_| std::thread::sleep(Duration::from_millis(200)));

        let publisher = dispatcher.publisher();
        let started = std::time::Instant::now();
        for _ in 0..10 {
            publisher.trigger(ServiceEvent::FirstMove);
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
