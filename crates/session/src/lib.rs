//! Session controller: owns the stimulus transport, turns inbound messages
//! into [`ExperimentEvent`]s and state updates, and turns outbound semantic
//! commands into wire messages.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use shared::{
    domain::{RemoteAppState, Selection, ServerState},
    error::ProtocolError,
    protocol::{ExperimentEvent, ExperimentParameters, OutboundCommand},
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub mod frame;
pub mod state;
pub mod tcp;
pub mod transport;

pub use state::{RunStateHandle, StateCell, StateWatch};
pub use tcp::TcpTransport;
pub use transport::{InboundFrame, RecordingTransport, SentCommand, Transport, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start stimulus transport: {0}")]
    Start(#[source] TransportError),
    #[error("failed to stop stimulus transport: {0}")]
    Stop(#[source] TransportError),
    #[error("bad message from {address}: {source}")]
    Protocol {
        address: SocketAddr,
        source: ProtocolError,
    },
    #[error("session state channel closed")]
    StateClosed,
}

/// Events forwarded to the orchestrator, in arrival order.
pub type EventReceiver = mpsc::UnboundedReceiver<ExperimentEvent>;

pub struct SessionController {
    transport: Arc<dyn Transport>,
    server_state: StateCell<ServerState>,
    remote_state: StateCell<RemoteAppState>,
    events: mpsc::UnboundedSender<ExperimentEvent>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>) -> (Arc<Self>, EventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            transport,
            server_state: StateCell::new(ServerState::Down),
            remote_state: StateCell::new(RemoteAppState::Down),
            events,
            dispatch_task: Mutex::new(None),
        });
        (controller, events_rx)
    }

    pub fn server_state(&self) -> StateWatch<ServerState> {
        self.server_state.watch()
    }

    pub fn remote_state(&self) -> StateWatch<RemoteAppState> {
        self.remote_state.watch()
    }

    /// Starts the transport and the inbound dispatch task. A bind failure is
    /// returned to the caller and is fatal to session setup.
    pub async fn start_server(self: &Arc<Self>) -> Result<SocketAddr, SessionError> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundFrame>();
        let local_addr = self
            .transport
            .start(inbound_tx)
            .await
            .map_err(SessionError::Start)?;

        let controller = Arc::clone(self);
        let dispatch = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                if let Err(error) = controller.on_message(frame.address, &frame.raw) {
                    error!(%error, raw = %frame.raw, "rejected inbound message");
                }
            }
        });
        if let Some(previous) = self
            .dispatch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(dispatch)
        {
            previous.abort();
        }

        self.server_state.set(ServerState::Up);
        info!(%local_addr, "session server is up");
        Ok(local_addr)
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        let dispatch = self
            .dispatch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let result = self.transport.stop().await.map_err(SessionError::Stop);
        if let Some(dispatch) = dispatch {
            dispatch.abort();
        }
        self.server_state.set(ServerState::Down);
        info!("session server is down");
        result
    }

    /// Queues `command` for the next send cycle. Fire-and-forget.
    pub fn send_command(&self, command: OutboundCommand, filter: Option<&[SocketAddr]>) {
        debug!(command = command.name(), "sending command");
        self.transport.send(filter, &command);
    }

    /// Decodes one inbound message and applies it. Only this message is
    /// affected by a decode failure.
    pub fn on_message(&self, address: SocketAddr, raw: &str) -> Result<(), SessionError> {
        let event = ExperimentEvent::decode(raw)
            .map_err(|source| SessionError::Protocol { address, source })?;
        self.dispatch(address, event);
        Ok(())
    }

    fn dispatch(&self, address: SocketAddr, event: ExperimentEvent) {
        match event {
            ExperimentEvent::Waiting => {
                self.remote_state.set(RemoteAppState::Up);
                info!(%address, "stimulus app is up, waiting for parameters");
            }
            ExperimentEvent::Ready => {
                self.remote_state.set(RemoteAppState::Ready);
                info!(%address, "stimulus app is ready");
                // The host-owned run state is not written here; the
                // orchestrator reacts to this event and asks the host.
                self.forward(ExperimentEvent::Ready);
            }
            ExperimentEvent::Closed => {
                self.remote_state.set(RemoteAppState::Down);
                info!(%address, "stimulus app closed the connection");
            }
            ExperimentEvent::Finished => {
                self.remote_state.set(RemoteAppState::Finished);
                info!(%address, "stimulus app finished the run");
            }
            ExperimentEvent::Unknown(tag) => {
                warn!(%address, event_type = %tag, "unknown inbound event type");
            }
            event @ (ExperimentEvent::Onset(_)
            | ExperimentEvent::ResizeInfo(_)
            | ExperimentEvent::TrainModelRequest
            | ExperimentEvent::ProcessRequest) => self.forward(event),
        }
    }

    fn forward(&self, event: ExperimentEvent) {
        if self.events.send(event).is_err() {
            debug!("no orchestrator listening, event dropped");
        }
    }

    pub fn send_parameters(&self, parameters: ExperimentParameters) {
        info!(mode = parameters.mode.as_str(), "sending parameters");
        self.send_command(OutboundCommand::SetParameters(parameters), None);
    }

    pub fn play(&self) {
        info!("play");
        self.send_command(OutboundCommand::Play, None);
    }

    pub fn pause(&self) {
        info!("pause");
        self.send_command(OutboundCommand::Pause, None);
    }

    pub fn resume(&self) {
        info!("resume");
        self.send_command(OutboundCommand::Resume, None);
    }

    pub fn stop_stimulus(&self) {
        info!("stop");
        self.send_command(OutboundCommand::Stop, None);
    }

    pub fn notify_selection(&self, selection: &Selection) {
        info!(label = %selection.label, coords = ?selection.coords, "notifying selection");
        self.send_command(OutboundCommand::selection(selection.coords), None);
    }

    pub fn notify_model_trained(&self) {
        info!("notifying that the model is trained");
        self.send_command(OutboundCommand::ModelTrained, None);
    }

    pub fn notify_exception(&self, message: impl Into<String>) {
        self.send_command(
            OutboundCommand::Exception {
                exception: message.into(),
            },
            None,
        );
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
