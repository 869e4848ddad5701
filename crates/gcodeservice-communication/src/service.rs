//! Service facade
//!
//! [`GcodeService`] is the public surface used by job pushers, monitors and
//! remote wrappers. It owns the engine workers and the callback dispatcher.
//! There is no process-wide instance; the composition root creates one and
//! hands out references.

use crate::command::{Command, DEFAULT_EXPECTED_REPLY};
use crate::engine::{self, EngineConfig, EngineState, EngineStatus, Shared};
use crate::transport::Transport;
use gcodeservice_core::{
    CallbackDispatcher, EventSubscriber, Result, ServiceEvent, TransportError,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Motion controller command service
pub struct GcodeService {
    shared: Arc<Shared>,
    dispatcher: CallbackDispatcher,
    sender: Mutex<Option<JoinHandle<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl GcodeService {
    /// Start the sender, the receiver and the callback dispatcher
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        if !transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let dispatcher = CallbackDispatcher::spawn();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(
            config,
            transport,
            dispatcher.publisher(),
            cmd_tx,
        ));

        let receiver = {
            let shared = shared.clone();
            tokio::task::spawn_blocking(move || engine::receiver::run(shared))
        };
        let sender = tokio::spawn(engine::sender::run(shared.clone(), cmd_rx));

        tracing::info!(
            "GCode service started on {} (checksum {})",
            shared.transport.name(),
            if shared.config.checksum { "on" } else { "off" }
        );

        Ok(Self {
            shared,
            dispatcher,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Send one G-code line
    ///
    /// Returns the reply lines ending with the one that starts with
    /// `expected_reply`, or `None` when the call did not block, timed out,
    /// the service stopped, or a resend invalidated the reply.
    ///
    /// `M25` and `M24` are handled locally as pause and resume.
    pub async fn send(
        &self,
        code: &str,
        expected_reply: &str,
        block: bool,
        timeout: Option<Duration>,
    ) -> Option<Vec<String>> {
        let code = code.trim();
        match code.split_whitespace().next().map(str::to_ascii_uppercase).as_deref() {
            Some("M25") => {
                self.pause();
                return None;
            }
            Some("M24") => {
                self.resume();
                return None;
            }
            _ => {}
        }

        if !self.is_running() {
            tracing::debug!("Not running, dropping {}", code);
            return None;
        }

        let cmd = Arc::new(Command::gcode(code, expected_reply));
        if !self.shared.enqueue(cmd.clone()) || !block {
            return None;
        }

        match timeout {
            Some(timeout) => {
                if !cmd.wait_timeout(timeout).await {
                    tracing::debug!("Timed out waiting for {} ({})", cmd, cmd.id());
                    return None;
                }
            }
            None => {
                let slice = self.shared.config.reply_poll_interval;
                while !cmd.wait_timeout(slice).await {
                    if !self.is_running() {
                        return None;
                    }
                }
            }
        }

        cmd.reply()
    }

    /// [`send`](Self::send) with the default expected reply, blocking without a timeout
    pub async fn send_gcode(&self, code: &str) -> Option<Vec<String>> {
        self.send(code, DEFAULT_EXPECTED_REPLY, true, None).await
    }

    /// Queue a job file for streaming; false if a file is already streaming
    pub fn send_file(&self, path: impl AsRef<Path>) -> bool {
        if !self.is_running() || !self.shared.try_queue_file() {
            return false;
        }
        let path = path.as_ref().display().to_string();
        tracing::info!("Queued file {}", path);
        self.shared.enqueue(Arc::new(Command::file(path)))
    }

    pub fn pause(&self) {
        self.shared.enqueue(Arc::new(Command::pause()));
    }

    pub fn resume(&self) {
        self.shared.enqueue(Arc::new(Command::resume()));
    }

    pub fn abort(&self) {
        self.shared.enqueue_interrupting(Arc::new(Command::abort()));
    }

    /// Reset the controller; every pending command is released without a reply
    pub fn reset(&self) {
        self.shared.enqueue_interrupting(Arc::new(Command::reset()));
    }

    /// Install the event subscriber, replacing any previous one
    pub fn register_callback(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.dispatcher.register(subscriber);
    }

    /// Install a closure as the event subscriber
    pub fn register_fn<F>(&self, handler: F)
    where
        F: Fn(ServiceEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register_fn(handler);
    }

    pub fn unregister_callback(&self) {
        self.dispatcher.unregister();
    }

    /// File progress in percent
    pub fn get_progress(&self) -> f64 {
        self.shared.progress()
    }

    /// Seconds since the last line was received
    pub fn get_idle_time(&self) -> f64 {
        self.shared.idle_time().as_secs_f64()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Resolves once the service stopped, by request or transport failure
    pub async fn stopped(&self) {
        self.shared.stopped().await
    }

    /// Wait until both workers have terminated
    pub async fn loop_until_stopped(&self) {
        self.shared.stopped().await;
        let sender = self.sender.lock().take();
        if let Some(handle) = sender {
            let _ = handle.await;
        }
        let receiver = self.receiver.lock().take();
        if let Some(handle) = receiver {
            let _ = handle.await;
        }
    }

    /// Stop both workers and release every waiting caller
    ///
    /// With `wait_for_reply` the receiver keeps collecting replies for
    /// commands already on the wire, for at most one poll interval.
    pub async fn stop(&self, wait_for_reply: bool) {
        self.shared.set_wait_for_reply(wait_for_reply);
        self.shared.mark_stopped();
        self.shared.enqueue_interrupting(Arc::new(Command::kill()));

        let receiver = self.receiver.lock().take();
        if let Some(handle) = receiver {
            if let Err(e) = handle.await {
                tracing::warn!("Receiver worker failed: {}", e);
            }
        }
        self.shared.replies.release_all();

        let sender = self.sender.lock().take();
        if let Some(handle) = sender {
            if let Err(e) = handle.await {
                tracing::warn!("Sender worker failed: {}", e);
            }
        }
        self.shared.replies.release_all();

        if let Err(e) = self.shared.transport.close() {
            tracing::warn!("Failed to close {}: {}", self.shared.transport.name(), e);
        }
        tracing::info!("GCode service stopped");
    }
}

impl Drop for GcodeService {
    fn drop(&mut self) {
        if self.shared.mark_stopped() {
            self.shared.enqueue_interrupting(Arc::new(Command::kill()));
        }
    }
}

impl std::fmt::Debug for GcodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcodeService")
            .field("transport", &self.shared.transport.name())
            .field("running", &self.is_running())
            .field("state", &self.state())
            .finish()
    }
}
