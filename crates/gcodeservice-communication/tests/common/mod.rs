#![allow(dead_code)]

use gcodeservice_communication::{EngineConfig, Transport, TransportResult};
use gcodeservice_core::{ServiceEvent, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Responder = Box<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// In-memory firmware
///
/// Every written line is recorded. With a responder installed, the reply
/// lines it returns are queued for reading; otherwise the test feeds lines
/// with [`MockTransport::push_line`].
pub struct MockTransport {
    written: Mutex<Vec<String>>,
    inbound: Mutex<VecDeque<u8>>,
    readable: Condvar,
    responder: Mutex<Option<Responder>>,
    open: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    resets: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            written: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
            responder: Mutex::new(None),
            open: AtomicBool::new(true),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            resets: AtomicUsize::new(0),
        })
    }

    /// Firmware that answers `ok` to everything
    pub fn auto_ok() -> Arc<Self> {
        let mock = Self::new();
        mock.set_responder(|_| vec!["ok".to_string()]);
        mock
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    pub fn push_line(&self, line: &str) {
        let mut inbound = self.inbound.lock();
        inbound.extend(line.as_bytes());
        inbound.push_back(b'\n');
        self.readable.notify_all();
    }

    /// Bytes without a terminator, as a line cut off mid-transfer
    pub fn push_partial(&self, text: &str) {
        self.inbound.lock().extend(text.as_bytes());
        self.readable.notify_all();
    }

    /// True once the engine has read everything pushed so far
    pub fn inbound_empty(&self) -> bool {
        self.inbound.lock().is_empty()
    }

    /// Lines written so far, terminators removed
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }

    pub fn has_written(&self, line: &str) -> bool {
        self.written.lock().iter().any(|w| unframe(w) == line)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Make every following read fail
    pub fn break_link(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
        self.readable.notify_all();
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub async fn wait_written(&self, line: &str) {
        let line = line.to_string();
        wait_until(|| self.has_written(&line)).await;
    }
}

/// Strip `N<seq> ` and `*<checksum>` framing
pub fn unframe(line: &str) -> &str {
    match line.strip_prefix('N') {
        Some(rest) if line.contains('*') => {
            let body = rest.split_once(' ').map(|(_, b)| b).unwrap_or(rest);
            body.rsplit_once('*').map(|(b, _)| b).unwrap_or(body)
        }
        _ => line,
    }
}

impl Transport for MockTransport {
    fn read_available(&self, buf: &mut [u8]) -> TransportResult<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        let mut inbound = self.inbound.lock();
        if inbound.is_empty() && !self.fail_reads.load(Ordering::SeqCst) {
            self.readable
                .wait_for(&mut inbound, Duration::from_millis(10));
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost {
                reason: "cable unplugged".to_string(),
            });
        }
        let n = buf.len().min(inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost {
                reason: "write failed".to_string(),
            });
        }
        let text = String::from_utf8_lossy(data).to_string();
        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            self.written.lock().push(line.to_string());
            let replies = self
                .responder
                .lock()
                .as_ref()
                .map(|respond| respond(unframe(line)))
                .unwrap_or_default();
            for reply in replies {
                self.push_line(&reply);
            }
        }
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        Ok(())
    }

    fn reset_buffers(&self) -> TransportResult<()> {
        self.inbound.lock().clear();
        Ok(())
    }

    fn reset_controller(&self) -> TransportResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Engine config with short timings for tests
pub fn test_config() -> EngineConfig {
    EngineConfig {
        reply_poll_interval: Duration::from_millis(100),
        reset_settle: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Poll a condition for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every event delivered to the subscriber
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ServiceEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> impl Fn(ServiceEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().push(event)
    }

    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, event: &ServiceEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub async fn wait_for(&self, event: &ServiceEvent) {
        wait_until(|| self.count(event) > 0).await;
    }
}
