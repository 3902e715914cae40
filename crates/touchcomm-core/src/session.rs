//! Concurrent session over a protocol engine.
//!
//! The engine is single-owner by construction, so concurrency is done by
//! message passing: one consumer thread owns the boxed engine and works
//! through requests from an mpsc channel. Clonable handles let any
//! number of threads submit commands or deliver inbound events; the
//! consumer serializes them, and requests that arrive while a command
//! waits for its event-driven completion are parked in a backlog.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::engine::{CommandResponse, CommandStatus, ProtocolEngine, ResponseMode, WriteOutcome};
use crate::error::TcmError;
use crate::identify::IdentifyInfo;

enum SessionRequest {
    Execute {
        command: u8,
        payload: Vec<u8>,
        total_length: usize,
        mode: ResponseMode,
        reply: Sender<Result<CommandResponse, TcmError>>,
    },
    Inbound {
        reply: Sender<Result<u8, TcmError>>,
    },
    ExternalPayload {
        reply: Sender<Vec<u8>>,
    },
    ReportPayload {
        reply: Sender<Vec<u8>>,
    },
    Identity {
        reply: Sender<Option<IdentifyInfo>>,
    },
    Shutdown,
}

/// Cloneable entry point into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Sender<SessionRequest>,
}

impl SessionHandle {
    /// Run one command to completion and return its response.
    pub fn execute(
        &self,
        command: u8,
        payload: &[u8],
        total_length: usize,
        mode: ResponseMode,
    ) -> Result<CommandResponse, TcmError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(SessionRequest::Execute {
                command,
                payload: payload.to_vec(),
                total_length,
                mode,
                reply,
            })
            .map_err(|_| TcmError::SessionClosed)?;
        rx.recv().map_err(|_| TcmError::SessionClosed)?
    }

    /// Deliver an inbound event (the device signalled attention). The
    /// consumer fetches and dispatches one packet, returning its code.
    pub fn notify_inbound_event(&self) -> Result<u8, TcmError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(SessionRequest::Inbound { reply })
            .map_err(|_| TcmError::SessionClosed)?;
        rx.recv().map_err(|_| TcmError::SessionClosed)?
    }

    /// Copy of the payload delivered by the most recent inbound packet.
    pub fn external_payload(&self) -> Result<Vec<u8>, TcmError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(SessionRequest::ExternalPayload { reply })
            .map_err(|_| TcmError::SessionClosed)?;
        rx.recv().map_err(|_| TcmError::SessionClosed)
    }

    /// Copy of the payload of the most recent asynchronous report.
    pub fn report_payload(&self) -> Result<Vec<u8>, TcmError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(SessionRequest::ReportPayload { reply })
            .map_err(|_| TcmError::SessionClosed)?;
        rx.recv().map_err(|_| TcmError::SessionClosed)
    }

    /// Most recent identification, if the device has produced one.
    pub fn identity(&self) -> Result<Option<IdentifyInfo>, TcmError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(SessionRequest::Identity { reply })
            .map_err(|_| TcmError::SessionClosed)?;
        rx.recv().map_err(|_| TcmError::SessionClosed)
    }
}

/// Owns the consumer thread for one engine.
pub struct TcmSession {
    tx: Sender<SessionRequest>,
    worker: Option<JoinHandle<()>>,
}

impl TcmSession {
    /// Move the engine onto a fresh consumer thread.
    pub fn spawn(engine: impl ProtocolEngine + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || run(Box::new(engine), rx));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stop the consumer thread, dropping the engine and its transport.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let _ = self.tx.send(SessionRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Session thread panicked during shutdown");
            }
        }
    }
}

impl Drop for TcmSession {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn run(mut engine: Box<dyn ProtocolEngine>, rx: Receiver<SessionRequest>) {
    let mut backlog: VecDeque<SessionRequest> = VecDeque::new();
    loop {
        let request = match backlog.pop_front() {
            Some(request) => request,
            None => match rx.recv() {
                Ok(request) => request,
                // All handles gone; nothing can ever arrive again.
                Err(_) => break,
            },
        };
        match request {
            SessionRequest::Execute {
                command,
                payload,
                total_length,
                mode,
                reply,
            } => {
                let result = run_command(
                    engine.as_mut(),
                    &rx,
                    &mut backlog,
                    command,
                    &payload,
                    total_length,
                    mode,
                );
                let _ = reply.send(result);
            }
            SessionRequest::Inbound { reply } => {
                let _ = reply.send(engine.read_message());
            }
            SessionRequest::ExternalPayload { reply } => {
                let _ = reply.send(engine.external_payload().to_vec());
            }
            SessionRequest::ReportPayload { reply } => {
                let _ = reply.send(engine.report_payload().to_vec());
            }
            SessionRequest::Identity { reply } => {
                let _ = reply.send(engine.identity().cloned());
            }
            SessionRequest::Shutdown => break,
        }
    }
    debug!("Session thread exiting");
}

/// Drive one command to completion on the consumer thread.
///
/// In event-driven mode the command stays pending until an inbound event
/// delivers its terminal packet; other requests arriving meanwhile are
/// answered (payload reads) or parked in the backlog (further commands)
/// so they run after this one finishes.
fn run_command(
    engine: &mut dyn ProtocolEngine,
    rx: &Receiver<SessionRequest>,
    backlog: &mut VecDeque<SessionRequest>,
    command: u8,
    payload: &[u8],
    total_length: usize,
    mode: ResponseMode,
) -> Result<CommandResponse, TcmError> {
    match engine.write_message(command, payload, total_length, mode)? {
        WriteOutcome::Complete(response) => Ok(response),
        WriteOutcome::Pending => {
            let deadline = Instant::now() + engine.config().command_timeout();
            loop {
                let now = Instant::now();
                if now >= deadline {
                    return Err(engine.abort_command());
                }
                let wait = (deadline - now).min(Duration::from_millis(100));
                match rx.recv_timeout(wait) {
                    Ok(SessionRequest::Inbound { reply }) => {
                        let code = engine.read_message();
                        let _ = reply.send(code);
                        if engine.command_status() != CommandStatus::Busy {
                            return engine.finish_command();
                        }
                    }
                    Ok(SessionRequest::ExternalPayload { reply }) => {
                        let _ = reply.send(engine.external_payload().to_vec());
                    }
                    Ok(SessionRequest::ReportPayload { reply }) => {
                        let _ = reply.send(engine.report_payload().to_vec());
                    }
                    Ok(SessionRequest::Identity { reply }) => {
                        let _ = reply.send(engine.identity().cloned());
                    }
                    Ok(request @ SessionRequest::Execute { .. }) => {
                        // Commands are strictly one at a time.
                        backlog.push_back(request);
                    }
                    Ok(SessionRequest::Shutdown) => {
                        backlog.push_back(SessionRequest::Shutdown);
                        return Err(engine.abort_command());
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(engine.abort_command());
                    }
                }
            }
        }
    }
}
