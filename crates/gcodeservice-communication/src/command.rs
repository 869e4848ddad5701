//! Command/reply model
//!
//! A [`Command`] is a unit of outgoing work. It is created by a caller or
//! by the engine, travels through the command queue to the sender, then
//! through the reply queue to the receiver, which accumulates reply lines
//! and completes it. The issuer keeps an `Arc` to await completion and
//! read the reply.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Default expected reply prefix
pub const DEFAULT_EXPECTED_REPLY: &str = "ok";

/// Command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// A single G-code line
    Gcode,
    /// Stream a job file; the payload is the path
    File,
    /// Pause a file stream
    Pause,
    /// Resume a paused file stream
    Resume,
    /// Abort a file stream
    Abort,
    /// Reset the controller
    Reset,
    /// Terminate the sender worker
    Kill,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcode => write!(f, "gcode"),
            Self::File => write!(f, "file"),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Abort => write!(f, "abort"),
            Self::Reset => write!(f, "reset"),
            Self::Kill => write!(f, "kill"),
        }
    }
}

/// Bucket used for progress accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckGroup {
    /// Interactive commands
    Gcode,
    /// Lines streamed from a job file
    File,
}

impl fmt::Display for AckGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcode => write!(f, "gcode"),
            Self::File => write!(f, "file"),
        }
    }
}

/// A unit of outgoing work with its accumulating reply
pub struct Command {
    id: Uuid,
    kind: CommandKind,
    payload: String,
    expected_reply: String,
    group: AckGroup,
    protocol_control: bool,
    /// `None` once the reply has been discarded
    reply: Mutex<Option<Vec<String>>>,
    done: AtomicBool,
    notify: Notify,
}

impl Command {
    fn new(kind: CommandKind, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload: payload.into(),
            expected_reply: DEFAULT_EXPECTED_REPLY.to_string(),
            group: AckGroup::Gcode,
            protocol_control: false,
            reply: Mutex::new(Some(Vec::new())),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// A G-code line completed by a line starting with `expected_reply`
    pub fn gcode(code: impl Into<String>, expected_reply: impl Into<String>) -> Self {
        let mut cmd = Self::new(CommandKind::Gcode, code);
        cmd.expected_reply = expected_reply.into();
        cmd
    }

    /// Stream a job file
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(CommandKind::File, path)
    }

    /// Pause request
    pub fn pause() -> Self {
        Self::new(CommandKind::Pause, "")
    }

    /// Resume request
    pub fn resume() -> Self {
        Self::new(CommandKind::Resume, "")
    }

    /// Abort request
    pub fn abort() -> Self {
        Self::new(CommandKind::Abort, "")
    }

    /// Controller reset request
    pub fn reset() -> Self {
        Self::new(CommandKind::Reset, "")
    }

    /// Sender termination request
    pub fn kill() -> Self {
        Self::new(CommandKind::Kill, "")
    }

    /// Put the command in the given ack group
    pub fn with_group(mut self, group: AckGroup) -> Self {
        self.group = group;
        self
    }

    /// Mark as a line-number handshake command whose reply survives a resend
    pub fn as_protocol_control(mut self) -> Self {
        self.protocol_control = true;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn group(&self) -> AckGroup {
        self.group
    }

    pub fn is_protocol_control(&self) -> bool {
        self.protocol_control
    }

    /// The command code, e.g. `M109` for `M109 S210`
    pub fn code(&self) -> &str {
        self.payload.split_whitespace().next().unwrap_or("")
    }

    /// Whether `line` completes this command
    pub fn has_expected_reply(&self, line: &str) -> bool {
        line.starts_with(self.expected_reply.as_str())
    }

    /// Append a reply line; ignored once the reply was discarded
    pub fn push_reply(&self, line: impl Into<String>) {
        if let Some(lines) = self.reply.lock().as_mut() {
            lines.push(line.into());
        }
    }

    /// Line number requested by a `Resend:` line just before the terminal line
    pub fn resend_request(&self) -> Option<u64> {
        let guard = self.reply.lock();
        let lines = guard.as_ref()?;
        if lines.len() < 2 {
            return None;
        }
        crate::firmware::parse_resend(&lines[lines.len() - 2])
    }

    /// Drop the accumulated reply so the waiter sees "no answer"
    pub fn discard_reply(&self) {
        *self.reply.lock() = None;
    }

    /// Snapshot of the reply, `None` when discarded
    pub fn reply(&self) -> Option<Vec<String>> {
        self.reply.lock().clone()
    }

    /// Signal completion; only the first call has an effect
    pub fn complete(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Complete with an absent reply, releasing the waiter
    pub fn release(&self) -> bool {
        if self.is_done() {
            return false;
        }
        self.discard_reply();
        self.complete()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait for completion
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for completion up to `timeout`; true if completed
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("expected_reply", &self.expected_reply)
            .field("group", &self.group)
            .field("done", &self.is_done())
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}:{}", self.kind, self.payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_code_and_expected_reply() {
        let cmd = Command::gcode("M109 S210", "ok");
        assert_eq!(cmd.code(), "M109");
        assert!(cmd.has_expected_reply("ok T:210"));
        assert!(!cmd.has_expected_reply("T:190 E:0 W:?"));
        assert_eq!(cmd.kind(), CommandKind::Gcode);
        assert_eq!(cmd.group(), AckGroup::Gcode);
    }

    #[test]
    fn test_resend_request_reads_second_to_last_line() {
        let cmd = Command::gcode("G1 X1", "ok");
        cmd.push_reply("Resend:7");
        assert_eq!(cmd.resend_request(), None);
        cmd.push_reply("ok");
        assert_eq!(cmd.resend_request(), Some(7));
    }

    #[test]
    fn test_release_discards_reply() {
        let cmd = Command::gcode("M105", "ok");
        cmd.push_reply("T:20 /0");
        assert!(cmd.release());
        assert!(cmd.is_done());
        assert_eq!(cmd.reply(), None);
        assert!(!cmd.release());
    }

    #[test]
    fn test_complete_once() {
        let cmd = Command::gcode("M105", "ok");
        cmd.push_reply("ok");
        assert!(cmd.complete());
        assert!(!cmd.complete());
        assert!(!cmd.release());
        assert_eq!(cmd.reply(), Some(vec!["ok".to_string()]));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_complete() {
        let cmd = Arc::new(Command::gcode("G28", "ok"));
        let waiter = {
            let cmd = cmd.clone();
            tokio::spawn(async move { cmd.wait().await })
        };
        tokio::task::yield_now().await;
        cmd.complete();
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wait_timeout_expires() {
        let cmd = Command::gcode("G28", "ok");
        assert!(!cmd.wait_timeout(Duration::from_millis(20)).await);
        cmd.complete();
        assert!(cmd.wait_timeout(Duration::from_millis(20)).await);
    }
}
