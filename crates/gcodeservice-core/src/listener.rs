//! Event subscriber interface
//!
//! Defines the subscriber trait the callback dispatcher delivers to.

use crate::event::ServiceEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver of service events
///
/// Implement this trait to be notified of file completion, state changes,
/// temperatures and machine actions. Delivery happens on the dispatcher task,
/// never on the sender or receiver workers.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Called once per published event, in publication order
    async fn on_event(&self, event: ServiceEvent);
}

/// Adapter turning a plain closure into an [`EventSubscriber`]
///
/// The closure runs on the blocking pool so a handler that sleeps or does
/// I/O only delays later callbacks, not the runtime.
pub struct FnSubscriber<F> {
    handler: Arc<F>,
}

impl<F> FnSubscriber<F>
where
    F: Fn(ServiceEvent) + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(ServiceEvent) + Send + Sync + 'static,
{
    async fn on_event(&self, event: ServiceEvent) {
        let handler = self.handler.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handler(event)).await {
            tracing::warn!("Event callback panicked: {}", e);
        }
    }
}
