//! Thread boundary between a supervisor and whoever controls it.
//!
//! `ControlServer` serves a `SupervisorHandle` on its own thread;
//! `ControlBridge` is the client side. Status travels as delimited text, so
//! a process-boundary adapter can forward it verbatim.

use crate::error::{FlowError, Result};
use crate::flow::stop::StopToken;
use crate::rats::status::StatusTable;
use crate::rats::supervisor::SupervisorHandle;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Commands accepted by the control server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start(String),
    Pause(String),
    Resume(String),
    Stop(String),
    PauseAll,
    ResumeAll,
    StopAll,
    /// Reply with the status table as CSV.
    Status,
    /// Stop every pipeline, then end the server loop.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    /// Names of the pipelines a bulk command touched.
    Affected(Vec<String>),
    /// CSV status table.
    Status(String),
    Failed(String),
}

struct ControlRequest {
    command: ControlCommand,
    reply: Sender<ControlReply>,
}

/// Channel capacity for commands (client → server).
const CMD_CHANNEL_CAPACITY: usize = 64;
/// Default wait for a reply.
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Client handle; cheap to clone, one reply channel per request.
#[derive(Clone)]
pub struct ControlBridge {
    cmd_tx: Sender<ControlRequest>,
    timeout: Duration,
}

impl ControlBridge {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `command` and wait for its reply.
    pub fn request(&self, command: ControlCommand) -> Result<ControlReply> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(ControlRequest {
                command,
                reply: reply_tx,
            })
            .map_err(|_| FlowError::Channel("control server is gone".into()))?;
        reply_rx.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => FlowError::Channel("timed out waiting for a control reply".into()),
            RecvTimeoutError::Disconnected => FlowError::Channel("control server dropped the request".into()),
        })
    }

    fn expect_done(&self, command: ControlCommand) -> Result<()> {
        match self.request(command)? {
            ControlReply::Done => Ok(()),
            ControlReply::Failed(message) => Err(FlowError::Remote(message)),
            other => Err(FlowError::Remote(format!("unexpected reply {:?}", other))),
        }
    }

    fn expect_affected(&self, command: ControlCommand) -> Result<Vec<String>> {
        match self.request(command)? {
            ControlReply::Affected(names) => Ok(names),
            ControlReply::Failed(message) => Err(FlowError::Remote(message)),
            other => Err(FlowError::Remote(format!("unexpected reply {:?}", other))),
        }
    }

    pub fn start(&self, name: &str) -> Result<()> {
        self.expect_done(ControlCommand::Start(name.to_string()))
    }

    pub fn pause(&self, name: &str) -> Result<()> {
        self.expect_done(ControlCommand::Pause(name.to_string()))
    }

    pub fn resume(&self, name: &str) -> Result<()> {
        self.expect_done(ControlCommand::Resume(name.to_string()))
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.expect_done(ControlCommand::Stop(name.to_string()))
    }

    pub fn pause_all(&self) -> Result<Vec<String>> {
        self.expect_affected(ControlCommand::PauseAll)
    }

    pub fn resume_all(&self) -> Result<Vec<String>> {
        self.expect_affected(ControlCommand::ResumeAll)
    }

    pub fn stop_all(&self) -> Result<Vec<String>> {
        self.expect_affected(ControlCommand::StopAll)
    }

    /// Raw CSV status, as a remote poller would receive it.
    pub fn status_text(&self) -> Result<String> {
        match self.request(ControlCommand::Status)? {
            ControlReply::Status(text) => Ok(text),
            ControlReply::Failed(message) => Err(FlowError::Remote(message)),
            other => Err(FlowError::Remote(format!("unexpected reply {:?}", other))),
        }
    }

    pub fn status(&self) -> Result<StatusTable> {
        StatusTable::from_csv(&self.status_text()?)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.expect_done(ControlCommand::Shutdown)
    }
}

/// Serves control commands for one supervisor.
pub struct ControlServer;

impl ControlServer {
    /// Spawn the server thread. It polls for commands every `tick` and
    /// exits on `Shutdown`, on `ControlServerHandle::shutdown`, or when
    /// every bridge is dropped.
    pub fn spawn(supervisor: SupervisorHandle, tick: Duration) -> Result<(ControlBridge, ControlServerHandle)> {
        let (cmd_tx, cmd_rx) = bounded(CMD_CHANNEL_CAPACITY);
        let stop = StopToken::new();
        let thread = thread::Builder::new().name("rat-control".into()).spawn({
            let stop = stop.clone();
            move || serve(&supervisor, &cmd_rx, &stop, tick)
        })?;
        let bridge = ControlBridge {
            cmd_tx,
            timeout: DEFAULT_REPLY_TIMEOUT,
        };
        Ok((
            bridge,
            ControlServerHandle {
                stop,
                thread: Some(thread),
            },
        ))
    }
}

fn serve(supervisor: &SupervisorHandle, commands: &Receiver<ControlRequest>, stop: &StopToken, tick: Duration) {
    tracing::debug!("Control server started");
    while !stop.is_stopped() {
        let request = match commands.recv_timeout(tick) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => {
                // collect pipelines that finished on their own
                supervisor.lock().reap();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let shutdown = request.command == ControlCommand::Shutdown;
        tracing::trace!(command = ?request.command, "Control command");
        let reply = handle(supervisor, request.command);
        let _ = request.reply.send(reply);
        if shutdown {
            break;
        }
    }
    tracing::debug!("Control server stopped");
}

fn handle(supervisor: &SupervisorHandle, command: ControlCommand) -> ControlReply {
    let done = |result: Result<()>| match result {
        Ok(()) => ControlReply::Done,
        Err(err) => ControlReply::Failed(err.to_string()),
    };
    let affected = |result: Result<Vec<String>>| match result {
        Ok(names) => ControlReply::Affected(names),
        Err(err) => ControlReply::Failed(err.to_string()),
    };
    match command {
        ControlCommand::Start(name) => done(supervisor.start(&name)),
        ControlCommand::Pause(name) => done(supervisor.pause(&name)),
        ControlCommand::Resume(name) => done(supervisor.resume(&name)),
        ControlCommand::Stop(name) => done(supervisor.stop(&name)),
        ControlCommand::PauseAll => affected(supervisor.pause_all()),
        ControlCommand::ResumeAll => affected(supervisor.resume_all()),
        ControlCommand::StopAll => affected(supervisor.stop_all()),
        ControlCommand::Status => ControlReply::Status(supervisor.status().to_csv()),
        ControlCommand::Shutdown => {
            supervisor.shutdown();
            ControlReply::Done
        }
    }
}

/// Owner side of a running control server.
pub struct ControlServerHandle {
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl ControlServerHandle {
    /// Stop the server loop within one tick and join it. Pipelines keep
    /// their state.
    pub fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Control server thread panicked");
            }
        }
    }
}

impl Drop for ControlServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
