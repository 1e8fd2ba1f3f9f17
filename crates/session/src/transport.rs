use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use shared::protocol::OutboundCommand;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::frame::FrameError;

/// One raw message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub address: SocketAddr,
    pub raw: String,
}

pub type InboundSender = mpsc::UnboundedSender<InboundFrame>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("transport already started")]
    AlreadyStarted,
    #[error("transport not started")]
    NotStarted,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message-oriented channel to the stimulus application.
///
/// Received messages are pushed into the sender handed to [`Transport::start`].
/// Sends are buffered and fire-and-forget: no acknowledgment, no retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, inbound: InboundSender) -> Result<SocketAddr, TransportError>;
    async fn stop(&self) -> Result<(), TransportError>;
    /// `None` addresses every connected client.
    fn send(&self, filter: Option<&[SocketAddr]>, command: &OutboundCommand);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub filter: Option<Vec<SocketAddr>>,
    pub command: OutboundCommand,
}

/// In-memory transport that records every send and lets callers inject
/// inbound messages as if a client had sent them.
pub struct RecordingTransport {
    address: SocketAddr,
    fail_start: bool,
    started: AtomicBool,
    inbound: Mutex<Option<InboundSender>>,
    sent: Mutex<Vec<SentCommand>>,
    sent_tx: broadcast::Sender<OutboundCommand>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        let (sent_tx, _) = broadcast::channel(256);
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 50000)),
            fail_start: false,
            started: AtomicBool::new(false),
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_tx,
        }
    }

    /// A transport whose `start` fails as if the port were taken.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Delivers `raw` as if `address` had sent it. Returns `false` when the
    /// transport is not running.
    pub fn inject(&self, address: SocketAddr, raw: impl Into<String>) -> bool {
        let guard = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx
                .send(InboundFrame {
                    address,
                    raw: raw.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sent_commands(&self) -> Vec<OutboundCommand> {
        self.sent().into_iter().map(|sent| sent.command).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundCommand> {
        self.sent_tx.subscribe()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn start(&self, inbound: InboundSender) -> Result<SocketAddr, TransportError> {
        if self.fail_start {
            return Err(TransportError::Bind {
                addr: self.address,
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(inbound);
        Ok(self.address)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.started.store(false, Ordering::SeqCst);
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    fn send(&self, filter: Option<&[SocketAddr]>, command: &OutboundCommand) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentCommand {
                filter: filter.map(<[SocketAddr]>::to_vec),
                command: command.clone(),
            });
        let _ = self.sent_tx.send(command.clone());
    }
}
