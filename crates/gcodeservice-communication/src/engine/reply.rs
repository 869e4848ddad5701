//! Reply queue and the active command
//!
//! Lock order is `active` then `queue`.

use crate::command::Command;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving side of the reply queue plus the command currently collecting lines
pub(crate) struct ReplyTracker {
    active: Mutex<Option<Arc<Command>>>,
    queue: Mutex<mpsc::Receiver<Arc<Command>>>,
}

impl ReplyTracker {
    pub(crate) fn new(queue: mpsc::Receiver<Arc<Command>>) -> Self {
        Self {
            active: Mutex::new(None),
            queue: Mutex::new(queue),
        }
    }

    /// The active command, popping the next one from the queue without
    /// blocking when there is none
    pub(crate) fn current(&self) -> Option<Arc<Command>> {
        let mut active = self.active.lock();
        if active.is_none() {
            *active = self.queue.lock().try_recv().ok();
        }
        active.clone()
    }

    /// Clear the active command if it is still `cmd`
    pub(crate) fn finish(&self, cmd: &Arc<Command>) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, cmd)) {
            *active = None;
        }
    }

    /// Whether any command is still waiting for its reply
    pub(crate) fn has_outstanding(&self) -> bool {
        let active = self.active.lock();
        active.is_some() || !self.queue.lock().is_empty()
    }

    /// Release the active command and everything queued with an absent reply
    pub(crate) fn release_all(&self) -> usize {
        let mut active = self.active.lock();
        let mut released = 0;
        if let Some(cmd) = active.take() {
            if cmd.release() {
                released += 1;
            }
        }
        let mut queue = self.queue.lock();
        while let Ok(cmd) = queue.try_recv() {
            if cmd.release() {
                released += 1;
            }
        }
        if released > 0 {
            tracing::debug!("Released {} commands awaiting a reply", released);
        }
        released
    }
}
