//! Command/reply engine
//!
//! Two long-lived workers share the state in [`Shared`]:
//! - the sender task consumes the command queue, writes lines and drives
//!   the file streaming state machine
//! - the receiver worker reads the transport, splits lines and matches them
//!   against the reply queue in FIFO order
//!
//! A command is pushed onto the reply queue before its line is written, so
//! a reply can never arrive ahead of the command it belongs to.

pub mod receiver;
pub mod reply;
pub mod sender;

use crate::command::{AckGroup, Command};
use crate::job::JobInfo;
use crate::transport::Transport;
use gcodeservice_core::{EngineError, EventPublisher, ServiceEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};

use self::reply::ReplyTracker;

/// Codes that start machine motion
pub const MOTION_CODES: &[&str] = &["G0", "G1", "G2", "G3", "G00", "G01", "G02", "G03"];

/// Codes the sender waits on before streaming further
pub const DEFAULT_BLOCKING_CODES: &[&str] = &["G27", "G28", "G29", "M109", "M190", "M400"];

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number and checksum every outgoing line
    pub checksum: bool,
    /// Maximum number of commands awaiting a reply
    pub reply_queue_size: usize,
    /// Slice used by unbounded waits to re-check that the service still runs
    pub reply_poll_interval: Duration,
    /// Pause between the physical reset and the handshake
    pub reset_settle: Duration,
    /// Extra commands sent after the line-number handshake
    pub handshake: Vec<String>,
    /// Codes whose completion is awaited while streaming
    pub blocking_codes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checksum: false,
            reply_queue_size: 8,
            reply_poll_interval: Duration::from_millis(3000),
            reset_settle: Duration::from_millis(1500),
            handshake: Vec::new(),
            blocking_codes: DEFAULT_BLOCKING_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.reply_queue_size == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "reply_queue_size must be greater than 0".to_string(),
            });
        }
        if self.reply_poll_interval.is_zero() {
            return Err(EngineError::InvalidConfig {
                reason: "reply_poll_interval must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Whether the sender waits for `code` to complete while streaming
    pub fn is_blocking(&self, code: &str) -> bool {
        self.blocking_codes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

/// Whether a code starts machine motion
pub fn is_motion(code: &str) -> bool {
    MOTION_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
}

/// File streaming state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// No file is streaming
    Idle,
    /// A file is streaming
    SendingFile,
    /// A file stream is paused
    Paused,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SendingFile => write!(f, "sending_file"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Snapshot reported to monitors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub progress: f64,
    pub idle_seconds: f64,
    pub file: Option<JobInfo>,
    pub file_lines_acked: u64,
}

#[derive(Debug)]
struct StatusInner {
    state: EngineState,
    progress: f64,
    acks: HashMap<AckGroup, u64>,
    total_gcode_lines: usize,
    file: Option<JobInfo>,
    file_queued: bool,
    first_move: bool,
}

impl StatusInner {
    fn new() -> Self {
        Self {
            state: EngineState::Idle,
            progress: 0.0,
            acks: HashMap::new(),
            total_gcode_lines: 0,
            file: None,
            file_queued: false,
            first_move: false,
        }
    }

    fn recompute_progress(&mut self) {
        if self.state == EngineState::Idle || self.total_gcode_lines == 0 {
            return;
        }
        let acked = self.acks.get(&AckGroup::File).copied().unwrap_or(0);
        self.progress = (100.0 * acked as f64 / self.total_gcode_lines as f64).min(100.0);
    }
}

/// State shared by the facade and both workers
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) replies: ReplyTracker,
    publisher: EventPublisher,
    status: Mutex<StatusInner>,
    running: watch::Sender<bool>,
    resetting: AtomicBool,
    wait_for_reply: AtomicBool,
    next_line: AtomicU64,
    last_activity: Mutex<Instant>,
    interrupt: Notify,
    interrupts: AtomicUsize,
    reset_epoch: AtomicU64,
    cmd_tx: mpsc::UnboundedSender<Arc<Command>>,
    reply_tx: mpsc::Sender<Arc<Command>>,
}

impl Shared {
    pub(crate) fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        publisher: EventPublisher,
        cmd_tx: mpsc::UnboundedSender<Arc<Command>>,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::channel(config.reply_queue_size);
        let (running, _) = watch::channel(true);
        Self {
            config,
            transport,
            replies: ReplyTracker::new(reply_rx),
            publisher,
            status: Mutex::new(StatusInner::new()),
            running,
            resetting: AtomicBool::new(false),
            wait_for_reply: AtomicBool::new(false),
            next_line: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            interrupt: Notify::new(),
            interrupts: AtomicUsize::new(0),
            reset_epoch: AtomicU64::new(0),
            cmd_tx,
            reply_tx,
        }
    }

    pub(crate) fn trigger(&self, event: ServiceEvent) {
        self.publisher.trigger(event);
    }

    // lifecycle

    pub(crate) fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Returns true if this call flipped the flag
    pub(crate) fn mark_stopped(&self) -> bool {
        self.running.send_replace(false)
    }

    pub(crate) async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    pub(crate) fn set_wait_for_reply(&self, wait: bool) {
        self.wait_for_reply.store(wait, Ordering::SeqCst);
    }

    pub(crate) fn wait_for_reply(&self) -> bool {
        self.wait_for_reply.load(Ordering::SeqCst)
    }

    /// Queue an Abort, Reset or Kill and wake the sender out of any
    /// interruptible wait
    ///
    /// The interrupt is counted before the command becomes visible, so the
    /// count never drops below the number of such commands still queued.
    pub(crate) fn enqueue_interrupting(&self, cmd: Arc<Command>) -> bool {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if !self.enqueue(cmd) {
            self.consume_interrupt();
            return false;
        }
        self.interrupt.notify_waiters();
        true
    }

    pub(crate) fn interrupt_pending(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst) > 0
    }

    /// The sender took an Abort, Reset or Kill off the command queue
    pub(crate) fn consume_interrupt(&self) {
        let _ = self
            .interrupts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Both workers terminate after a transport failure
    pub(crate) fn transport_failed(&self, reason: String) {
        if self.mark_stopped() {
            tracing::error!("Transport {} failed: {}", self.transport.name(), reason);
            self.trigger(ServiceEvent::TransportError(reason));
        }
        self.enqueue_interrupting(Arc::new(Command::kill()));
    }

    // queues

    pub(crate) fn enqueue(&self, cmd: Arc<Command>) -> bool {
        match self.cmd_tx.send(cmd) {
            Ok(()) => true,
            Err(mpsc::error::SendError(cmd)) => {
                tracing::debug!("Command queue closed, releasing {}", cmd);
                cmd.release();
                false
            }
        }
    }

    /// Push onto the reply queue, giving up on interrupt or shutdown
    async fn push_reply(&self, cmd: Arc<Command>) -> bool {
        tokio::select! {
            res = self.reply_tx.send(cmd) => res.is_ok(),
            _ = self.interrupt.notified() => false,
            _ = self.stopped() => false,
        }
    }

    // activity and sequencing

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn idle_time(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub(crate) fn is_resetting(&self) -> bool {
        self.resetting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_resetting(&self, resetting: bool) {
        if resetting {
            self.reset_epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.resetting.store(resetting, Ordering::SeqCst);
    }

    /// Number of resets started so far
    pub(crate) fn reset_epoch(&self) -> u64 {
        self.reset_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn next_line(&self) -> u64 {
        self.next_line.load(Ordering::SeqCst)
    }

    fn take_line_number(&self) -> u64 {
        self.next_line.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn rewind_line(&self, line: u64) {
        self.next_line.store(line, Ordering::SeqCst);
    }

    // status

    pub(crate) fn state(&self) -> EngineState {
        self.status.lock().state
    }

    pub(crate) fn progress(&self) -> f64 {
        self.status.lock().progress
    }

    pub(crate) fn snapshot(&self) -> EngineStatus {
        let status = self.status.lock();
        EngineStatus {
            state: status.state,
            progress: status.progress,
            idle_seconds: self.idle_time().as_secs_f64(),
            file: status.file.clone(),
            file_lines_acked: status.acks.get(&AckGroup::File).copied().unwrap_or(0),
        }
    }

    /// Reserve the engine for a file; false if one is streaming or queued
    pub(crate) fn try_queue_file(&self) -> bool {
        let mut status = self.status.lock();
        if status.state != EngineState::Idle || status.file_queued {
            return false;
        }
        status.file_queued = true;
        true
    }

    pub(crate) fn begin_file(&self, info: JobInfo) {
        let mut status = self.status.lock();
        status.state = EngineState::SendingFile;
        status.acks.insert(AckGroup::File, 0);
        status.progress = 0.0;
        status.total_gcode_lines = info.gcode_line_count;
        status.first_move = false;
        status.file = Some(info);
    }

    /// The queued file could not be started
    pub(crate) fn cancel_file(&self) {
        let mut status = self.status.lock();
        status.file_queued = false;
        status.state = EngineState::Idle;
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        self.status.lock().state = state;
    }

    /// True the first time it is called for the current file
    pub(crate) fn take_first_move(&self) -> bool {
        let mut status = self.status.lock();
        !std::mem::replace(&mut status.first_move, true)
    }

    pub(crate) fn acknowledge(&self, group: AckGroup) {
        let mut status = self.status.lock();
        *status.acks.entry(group).or_insert(0) += 1;
        if group == AckGroup::File {
            status.recompute_progress();
        }
    }

    pub(crate) fn update_progress(&self) {
        self.status.lock().recompute_progress();
    }

    /// Completion of a file stream, run once its last command is done
    ///
    /// Progress stays at 100 until the subscriber has handled `file_done`.
    pub(crate) async fn finish_file(&self) {
        {
            let mut status = self.status.lock();
            status.progress = 100.0;
            status.state = EngineState::Idle;
            status.file_queued = false;
        }
        tracing::info!("File done");
        self.publisher.deliver(ServiceEvent::FileDone).await;

        // a stream started meanwhile owns the progress value
        let mut status = self.status.lock();
        if status.state == EngineState::Idle {
            status.progress = 0.0;
        }
    }
}
