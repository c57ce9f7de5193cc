//! Framing and the client library
//!
//! Every frame is a 4-byte little-endian length followed by a bincode
//! payload. [`VolumeManagerClient`] wraps one daemon connection: requests go
//! out through a shared writer, a background task reads the daemon's frames
//! and routes replies, command results and `volumeDidChange` callbacks.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::daemon::shared::{ClientMessage, ClientToken, ServerMessage};
use crate::errors::{AppError, AppResult};
use crate::events::{decode_payload, encode_payload, Command, CommandData, EventMask};
use crate::volume::{MountedVolume, VolumeChangeInfo};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_frame_size: usize) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serde::encode_to_vec(message, bincode::config::standard())?;
    if payload.len() > max_frame_size {
        return Err(AppError::FrameTooLarge {
            size: payload.len(),
            limit: max_frame_size,
        });
    }

    let length = (payload.len() as u32).to_le_bytes();
    writer
        .write_all(&length)
        .await
        .map_err(|e| AppError::ipc_with_source("Failed to write frame length", e))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| AppError::ipc_with_source("Failed to write frame payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::ipc_with_source("Failed to flush frame", e))?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> AppResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(AppError::ipc_with_source("Failed to read frame length", e)),
    }

    let length = u32::from_le_bytes(length_bytes) as usize;
    if length > max_frame_size {
        return Err(AppError::FrameTooLarge {
            size: length,
            limit: max_frame_size,
        });
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::ipc_with_source("Failed to read frame payload", e))?;

    let (message, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())?;
    Ok(Some(message))
}

/// A `volumeDidChange` callback addressed to one of this connection's clients
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub client: ClientToken,
    pub info: VolumeChangeInfo,
}

/// Result of a command this connection issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub client: ClientToken,
    pub command: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatus {
    pub clients: usize,
    pub volumes: usize,
    pub uptime_secs: u64,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;

/// Connection to a running daemon
pub struct VolumeManagerClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingReplies,
    next_request: AtomicU64,
    notifications: flume::Receiver<Notification>,
    results: flume::Receiver<CommandOutcome>,
    pongs: flume::Receiver<()>,
    reader: JoinHandle<()>,
    max_frame_size: usize,
}

impl VolumeManagerClient {
    pub async fn connect(socket_path: &Path) -> AppResult<Self> {
        Self::connect_with(socket_path, DEFAULT_MAX_FRAME_SIZE).await
    }

    pub async fn connect_with(socket_path: &Path, max_frame_size: usize) -> AppResult<Self> {
        debug!("Connecting to daemon at {}", socket_path.display());
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| AppError::Socket {
                path: socket_path.to_path_buf(),
                operation: "connect".to_string(),
                source: Some(Box::new(e)),
            })?;
        let (mut read_half, write_half) = stream.into_split();

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notifications) = flume::unbounded();
        let (result_tx, results) = flume::unbounded();
        let (pong_tx, pongs) = flume::unbounded();

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            loop {
                let message = match read_frame::<_, ServerMessage>(&mut read_half, max_frame_size).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Daemon connection failed: {}", e);
                        break;
                    }
                };

                match message {
                    ServerMessage::VolumeDidChange { client, data } => {
                        match decode_payload::<VolumeChangeInfo>(&data) {
                            Ok(info) => {
                                let _ = notify_tx.send(Notification { client, info });
                            }
                            Err(e) => warn!("Undecodable notification: {}", e),
                        }
                    }
                    ServerMessage::CommandResult { client, command, error } => {
                        let _ = result_tx.send(CommandOutcome { client, command, error });
                    }
                    ServerMessage::Pong => {
                        let _ = pong_tx.send(());
                    }
                    ServerMessage::MountedVolumes { request, data } => {
                        let reply = ServerMessage::MountedVolumes { request, data };
                        Self::complete(&reader_pending, request, reply);
                    }
                    ServerMessage::Status { request, clients, volumes, uptime_secs } => {
                        let reply = ServerMessage::Status { request, clients, volumes, uptime_secs };
                        Self::complete(&reader_pending, request, reply);
                    }
                }
            }
            // Wake everyone still waiting for a reply
            reader_pending.lock().unwrap_or_else(|p| p.into_inner()).clear();
            debug!("Daemon connection closed");
        });

        Ok(VolumeManagerClient {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            next_request: AtomicU64::new(1),
            notifications,
            results,
            pongs,
            reader,
            max_frame_size,
        })
    }

    fn complete(pending: &PendingReplies, request: u64, reply: ServerMessage) {
        let waiter = pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&request);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!("Dropping reply to abandoned request {}", request),
        }
    }

    async fn send(&self, message: ClientMessage) -> AppResult<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &message, self.max_frame_size)
            .await
            .map_err(|e| AppError::DaemonCommunication {
                operation: format!("send {message:?}"),
                source: Some(Box::new(e)),
            })
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> AppResult<ServerMessage> {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request, tx);

        if let Err(e) = self.send(build(request)).await {
            self.pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&request);
            return Err(e);
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(AppError::DaemonCommunication {
                operation: "connection closed before reply".to_string(),
                source: None,
            }),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&request);
                Err(AppError::DaemonCommunication {
                    operation: "timed out waiting for reply".to_string(),
                    source: None,
                })
            }
        }
    }

    pub async fn register_client(&self, client: ClientToken) -> AppResult<()> {
        self.send(ClientMessage::RegisterClient { client }).await
    }

    pub async fn unregister_client(&self, client: ClientToken) -> AppResult<()> {
        self.send(ClientMessage::UnregisterClient { client }).await
    }

    pub async fn add_watcher_for_event(&self, client: ClientToken, event: EventMask) -> AppResult<()> {
        self.send(ClientMessage::AddWatcherForEvent {
            client,
            event: event.bits(),
        })
        .await
    }

    pub async fn add_watcher_for_events(&self, client: ClientToken, events: EventMask) -> AppResult<()> {
        self.send(ClientMessage::AddWatcherForEvents {
            client,
            events: events.bits(),
        })
        .await
    }

    pub async fn remove_watcher_for_event(&self, client: ClientToken, event: EventMask) -> AppResult<()> {
        self.send(ClientMessage::RemoveWatcherForEvent {
            client,
            event: event.bits(),
        })
        .await
    }

    /// One-way: returns once the command is sent
    pub async fn execute_command(&self, client: ClientToken, command: Command, device: &str) -> AppResult<()> {
        let data = encode_payload(&CommandData::for_device(device))?;
        self.send(ClientMessage::ExecuteCommand {
            client,
            command: command.wire_value(),
            data,
        })
        .await
    }

    /// Send a command and wait until the daemon reports how it went
    pub async fn execute_and_wait(
        &self,
        client: ClientToken,
        command: Command,
        device: &str,
        timeout: Duration,
    ) -> AppResult<()> {
        self.execute_command(client, command, device).await?;

        let wait = async {
            loop {
                match self.results.recv_async().await {
                    Ok(outcome) if outcome.client == client && outcome.command == command.wire_value() => {
                        return Ok(outcome)
                    }
                    Ok(_) => continue,
                    Err(_) => {
                        return Err(AppError::DaemonCommunication {
                            operation: "connection closed before command result".to_string(),
                            source: None,
                        })
                    }
                }
            }
        };

        let outcome = tokio::time::timeout(timeout, wait).await.map_err(|_| {
            AppError::DaemonCommunication {
                operation: format!("timed out waiting for {command}"),
                source: None,
            }
        })??;

        match outcome.error {
            None => Ok(()),
            Some(reason) => Err(AppError::mount_operation(device, command.to_string(), reason)),
        }
    }

    pub async fn get_mounted_volumes(&self) -> AppResult<BTreeMap<String, MountedVolume>> {
        match self.request(|request| ClientMessage::GetMountedVolumes { request }).await? {
            ServerMessage::MountedVolumes { data, .. } => decode_payload(&data),
            other => Err(AppError::ipc(format!("Unexpected reply: {other:?}"))),
        }
    }

    pub async fn status(&self) -> AppResult<DaemonStatus> {
        match self.request(|request| ClientMessage::Status { request }).await? {
            ServerMessage::Status {
                clients,
                volumes,
                uptime_secs,
                ..
            } => Ok(DaemonStatus {
                clients,
                volumes,
                uptime_secs,
            }),
            other => Err(AppError::ipc(format!("Unexpected reply: {other:?}"))),
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.send(ClientMessage::Ping).await?;
        match tokio::time::timeout(REPLY_TIMEOUT, self.pongs.recv_async()).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(AppError::DaemonCommunication {
                operation: "ping".to_string(),
                source: None,
            }),
        }
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.send(ClientMessage::Shutdown).await
    }

    /// Stream of `volumeDidChange` callbacks for this connection's clients
    pub fn notifications(&self) -> &flume::Receiver<Notification> {
        &self.notifications
    }
}

impl Drop for VolumeManagerClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
