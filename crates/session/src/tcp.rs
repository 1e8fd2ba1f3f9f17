use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::future::join_all;
use shared::protocol::OutboundCommand;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    frame::{encode_frame, FrameDecoder},
    transport::{InboundFrame, InboundSender, Transport, TransportError},
};

const READ_CHUNK: usize = 4096;

type ClientMap = Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>>;

/// TCP server transport. The stimulus application connects as a client.
pub struct TcpTransport {
    bind: SocketAddr,
    clients: ClientMap,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            clients: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            accept_task: Mutex::new(None),
        }
    }

    pub fn connected_clients(&self) -> Vec<SocketAddr> {
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&self, inbound: InboundSender) -> Result<SocketAddr, TransportError> {
        if self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
        {
            return Err(TransportError::AlreadyStarted);
        }

        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "stimulus transport listening");

        let clients = Arc::clone(&self.clients);
        let tasks = Arc::clone(&self.tasks);
        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, address)) => {
                        info!(%address, "stimulus client connected");
                        let handles =
                            spawn_connection(stream, address, Arc::clone(&clients), inbound.clone());
                        let mut tracked = tasks.lock().unwrap_or_else(|e| e.into_inner());
                        tracked.retain(|handle| !handle.is_finished());
                        tracked.extend(handles);
                    }
                    Err(error) => {
                        error!(%error, "failed to accept stimulus client");
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(accept);
        Ok(local_addr)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let accept = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TransportError::NotStarted)?;
        accept.abort();

        let mut handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        for handle in &handles {
            handle.abort();
        }
        handles.push(accept);
        join_all(handles).await;
        info!("stimulus transport stopped");
        Ok(())
    }

    fn send(&self, filter: Option<&[SocketAddr]>, command: &OutboundCommand) {
        let frame = match serde_json::to_string(command)
            .map_err(|e| TransportError::Frame(e.into()))
            .and_then(|body| encode_frame(&body).map_err(TransportError::from))
        {
            Ok(frame) => frame,
            Err(error) => {
                warn!(command = command.name(), %error, "dropping unencodable command");
                return;
            }
        };

        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        for (address, tx) in clients.iter() {
            if filter.is_some_and(|addrs| !addrs.contains(address)) {
                continue;
            }
            if tx.send(frame.clone()).is_err() {
                debug!(%address, command = command.name(), "client gone, command dropped");
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    address: SocketAddr,
    clients: ClientMap,
    inbound: InboundSender,
) -> [JoinHandle<()>; 2] {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    clients
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(address, tx);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(error) = writer.write_all(&frame).await {
                warn!(%address, %error, "failed to write to stimulus client");
                break;
            }
        }
    });

    let read_task = tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        'read: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(error) => {
                    warn!(%address, %error, "stimulus client read failed");
                    break;
                }
            };
            decoder.push(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(raw)) => {
                        if inbound.send(InboundFrame { address, raw }).is_err() {
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        error!(%address, %error, "undecodable frame, closing connection");
                        break 'read;
                    }
                }
            }
        }
        clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&address);
        info!(%address, "stimulus client disconnected");
    });

    [write_task, read_task]
}

#[cfg(test)]
#[path = "tests/tcp_tests.rs"]
mod tests;
