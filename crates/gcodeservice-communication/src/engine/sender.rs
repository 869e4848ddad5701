//! Sender worker
//!
//! Consumes the command queue, writes lines to the transport and runs the
//! file streaming state machine including pause, resume and abort.

use super::{is_motion, EngineState, Shared};
use crate::command::{AckGroup, Command, CommandKind};
use crate::firmware;
use crate::hooks;
use crate::job::GcodeFile;
use gcodeservice_core::{CommentInfo, ServiceEvent, StateChange, TransportError};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

type CommandQueue = UnboundedReceiver<Arc<Command>>;

/// How a file stream or the paused window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// File exhausted or aborted; keep serving commands
    Finished,
    /// Reset requested; the stream was aborted first
    Reset,
    /// Sender must terminate
    Kill,
}

/// Result of polling for out-of-band commands
enum Poll {
    Continue,
    Stop(StreamEnd),
}

/// Sender loop
pub(crate) async fn run(shared: Arc<Shared>, mut queue: CommandQueue) {
    tracing::debug!("Sender started");

    if let Err(e) = handshake(&shared).await {
        shared.transport_failed(e.to_string());
    }

    while let Some(cmd) = queue.recv().await {
        if !shared.is_running() && cmd.kind() != CommandKind::Kill {
            cmd.release();
            continue;
        }

        match cmd.kind() {
            CommandKind::Gcode => {
                if let Err(e) = send_line(&shared, &cmd).await {
                    shared.transport_failed(e.to_string());
                }
            }
            CommandKind::File => match stream_file(&shared, &mut queue, &cmd).await {
                StreamEnd::Finished => {}
                StreamEnd::Reset => {
                    if reset(&shared, &mut queue).await {
                        break;
                    }
                }
                StreamEnd::Kill => break,
            },
            CommandKind::Reset => {
                shared.consume_interrupt();
                cmd.complete();
                if reset(&shared, &mut queue).await {
                    break;
                }
            }
            CommandKind::Kill => {
                shared.consume_interrupt();
                cmd.complete();
                break;
            }
            CommandKind::Pause | CommandKind::Resume | CommandKind::Abort => {
                tracing::debug!("Ignoring {} while idle", cmd.kind());
                if cmd.kind() == CommandKind::Abort {
                    shared.consume_interrupt();
                }
                cmd.complete();
            }
        }
    }

    let mut released = 0;
    while let Ok(cmd) = queue.try_recv() {
        if cmd.release() {
            released += 1;
        }
    }
    if released > 0 {
        tracing::debug!("Released {} queued commands", released);
    }
    tracing::debug!("Sender stopped");
}

/// Publish hook actions, frame and write one line
///
/// The command is queued for its reply before the write. If the reply queue
/// cannot be entered because the service is stopping, the command is
/// released instead of written.
pub(crate) async fn send_line(shared: &Shared, cmd: &Arc<Command>) -> Result<(), TransportError> {
    let payload = cmd.payload();

    if let Some(action) = hooks::process_command(payload) {
        shared.trigger(ServiceEvent::GcodeAction(action));
    }

    let wire = if shared.config.checksum {
        firmware::frame_line(shared.take_line_number(), payload)
    } else {
        payload.to_string()
    };

    if !shared.push_reply(cmd.clone()).await {
        cmd.release();
        return Ok(());
    }

    tracing::debug!(">> {}", wire);
    shared.transport.write_line(&wire)
}

/// Line-number handshake plus configured startup commands
async fn handshake(shared: &Shared) -> Result<(), TransportError> {
    if shared.config.checksum {
        shared.rewind_line(0);
        let sync = Arc::new(Command::gcode("M110 N0", "ok").as_protocol_control());
        send_line(shared, &sync).await?;
    }
    for code in &shared.config.handshake {
        let cmd = Arc::new(Command::gcode(code.as_str(), "ok").as_protocol_control());
        send_line(shared, &cmd).await?;
    }
    Ok(())
}

/// Wait for a command, returning early on interrupt or shutdown
async fn wait_interruptible(shared: &Shared, cmd: &Command) {
    loop {
        let notified = shared.interrupt.notified();
        if shared.interrupt_pending() {
            tracing::debug!("Wait for {} interrupted", cmd);
            return;
        }
        tokio::select! {
            _ = cmd.wait() => return,
            _ = notified => {}
            _ = shared.stopped() => return,
        }
    }
}

async fn stream_file(shared: &Arc<Shared>, queue: &mut CommandQueue, file_cmd: &Command) -> StreamEnd {
    let path = file_cmd.payload().to_string();
    let opened = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || GcodeFile::open(path)).await
    };
    let file = match opened {
        Ok(Ok(file)) => file,
        Ok(Err(e)) => return file_error(shared, file_cmd, path, e.to_string()),
        Err(e) => return file_error(shared, file_cmd, path, e.to_string()),
    };

    tracing::info!(
        "Streaming {} ({} gcode lines)",
        path,
        file.info().gcode_line_count
    );
    shared.begin_file(file.info().clone());
    file_cmd.complete();

    let mut last: Option<Arc<Command>> = None;
    let mut end = StreamEnd::Finished;
    let mut aborted = false;

    for (code, attrs) in file.iter() {
        if !shared.is_running() {
            end = StreamEnd::Kill;
            aborted = true;
            break;
        }

        if attrs.is_comment {
            shared.trigger(ServiceEvent::ProcessComment(CommentInfo {
                line_number: attrs.line_number,
                text: attrs.comment.clone().unwrap_or_default(),
                layer: attrs.layer,
            }));
        }

        if !code.is_empty() {
            let word = code.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
            match word.as_str() {
                "M25" => {
                    shared.enqueue(Arc::new(Command::pause()));
                }
                "M24" => {
                    shared.enqueue(Arc::new(Command::resume()));
                }
                _ => {
                    if is_motion(&word) && shared.take_first_move() {
                        shared.trigger(ServiceEvent::FirstMove);
                    }

                    let cmd = Arc::new(Command::gcode(code, "ok").with_group(AckGroup::File));
                    if let Err(e) = send_line(shared, &cmd).await {
                        shared.transport_failed(e.to_string());
                        end = StreamEnd::Kill;
                        aborted = true;
                        break;
                    }
                    shared.update_progress();

                    if shared.config.is_blocking(&word) {
                        wait_interruptible(shared, &cmd).await;
                    }
                    last = Some(cmd);
                }
            }
        }

        if let Poll::Stop(stop) = poll_commands(shared, queue).await {
            end = stop;
            aborted = true;
            break;
        }
    }

    if aborted {
        tracing::info!("Stream of {} aborted", path);
        shared.trigger(ServiceEvent::StateChange(StateChange::Aborted));
    }

    // Completion is reported once the last line is acknowledged
    let waiter = shared.clone();
    tokio::spawn(async move {
        if let Some(last) = last {
            last.wait().await;
        }
        waiter.finish_file().await;
    });

    end
}

fn file_error(shared: &Shared, file_cmd: &Command, path: String, reason: String) -> StreamEnd {
    tracing::warn!("Cannot stream {}: {}", path, reason);
    shared.cancel_file();
    shared.trigger(ServiceEvent::FileError { path, reason });
    file_cmd.release();
    StreamEnd::Finished
}

/// Drain every command that is already queued without blocking
async fn poll_commands(shared: &Shared, queue: &mut CommandQueue) -> Poll {
    while let Ok(cmd) = queue.try_recv() {
        match cmd.kind() {
            CommandKind::Gcode => {
                if let Err(e) = send_line(shared, &cmd).await {
                    shared.transport_failed(e.to_string());
                    return Poll::Stop(StreamEnd::Kill);
                }
            }
            CommandKind::Pause => {
                cmd.complete();
                if let Some(end) = paused(shared, queue).await {
                    return Poll::Stop(end);
                }
            }
            CommandKind::Resume => {
                tracing::debug!("Resume while not paused ignored");
                cmd.complete();
            }
            CommandKind::Abort => {
                shared.consume_interrupt();
                cmd.complete();
                return Poll::Stop(StreamEnd::Finished);
            }
            CommandKind::Reset => {
                shared.consume_interrupt();
                cmd.complete();
                return Poll::Stop(StreamEnd::Reset);
            }
            CommandKind::Kill => {
                shared.consume_interrupt();
                cmd.complete();
                return Poll::Stop(StreamEnd::Kill);
            }
            CommandKind::File => {
                tracing::warn!("Rejecting {} while streaming", cmd);
                cmd.release();
            }
        }
    }
    Poll::Continue
}

/// Paused window; out-of-band G-code still goes to the wire
///
/// Returns `None` on resume.
async fn paused(shared: &Shared, queue: &mut CommandQueue) -> Option<StreamEnd> {
    shared.set_state(EngineState::Paused);
    tracing::info!("Stream paused");
    shared.trigger(ServiceEvent::StateChange(StateChange::Paused));

    while let Some(cmd) = queue.recv().await {
        match cmd.kind() {
            CommandKind::Gcode => {
                if !shared.is_running() {
                    cmd.release();
                    continue;
                }
                if let Err(e) = send_line(shared, &cmd).await {
                    shared.transport_failed(e.to_string());
                    return Some(StreamEnd::Kill);
                }
            }
            CommandKind::Resume => {
                cmd.complete();
                shared.set_state(EngineState::SendingFile);
                tracing::info!("Stream resumed");
                shared.trigger(ServiceEvent::StateChange(StateChange::Resumed));
                return None;
            }
            CommandKind::Pause => {
                cmd.complete();
            }
            CommandKind::Abort => {
                shared.consume_interrupt();
                cmd.complete();
                return Some(StreamEnd::Finished);
            }
            CommandKind::Reset => {
                shared.consume_interrupt();
                cmd.complete();
                return Some(StreamEnd::Reset);
            }
            CommandKind::Kill => {
                shared.consume_interrupt();
                cmd.complete();
                return Some(StreamEnd::Kill);
            }
            CommandKind::File => {
                tracing::warn!("Rejecting {} while paused", cmd);
                cmd.release();
            }
        }
    }
    Some(StreamEnd::Kill)
}

/// Controller reset; returns true if a kill was pending in the queue
async fn reset(shared: &Shared, queue: &mut CommandQueue) -> bool {
    tracing::info!("Resetting controller");
    shared.set_resetting(true);

    let mut kill = false;
    while let Ok(cmd) = queue.try_recv() {
        match cmd.kind() {
            CommandKind::Kill => {
                kill = true;
                shared.consume_interrupt();
            }
            CommandKind::Abort | CommandKind::Reset => shared.consume_interrupt(),
            _ => {}
        }
        cmd.release();
    }
    shared.replies.release_all();

    let transport = shared.transport.clone();
    match tokio::task::spawn_blocking(move || transport.reset_controller()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Controller reset failed: {}", e),
        Err(e) => tracing::error!("Controller reset task failed: {}", e),
    }
    tokio::time::sleep(shared.config.reset_settle).await;
    if let Err(e) = shared.transport.reset_buffers() {
        tracing::warn!("Failed to flush transport buffers: {}", e);
    }

    shared.set_resetting(false);
    shared.touch();

    if kill || !shared.is_running() {
        return true;
    }
    if let Err(e) = handshake(shared).await {
        shared.transport_failed(e.to_string());
    }
    false
}
