//! Unix socket server
//!
//! Each accepted connection gets a reader that decodes frames and queues them
//! for the dispatcher, which applies them in order. Volume commands can take
//! a while, so the dispatcher hands them to the connection's command worker,
//! which runs them one at a time in arrival order. A writer drains the
//! connection's outbox. Whichever side notices the connection is gone tells
//! the client registry.

use flume::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::connection::{ClientHandle, ConnectionId, ConnectionManager};
use super::shared::{ClientMessage, ClientToken, ServerMessage};
use crate::errors::{AppError, AppResult};
use crate::events::EventMask;
use crate::shared::ipc::{read_frame, write_frame};

/// A volume command accepted from a registered client
struct QueuedCommand {
    handle: ClientHandle,
    client: ClientToken,
    command: u32,
    data: Vec<u8>,
}

struct ServerContext {
    manager: Arc<ConnectionManager>,
    shutdown_requests: Sender<()>,
    start_time: Instant,
    max_frame_size: usize,
}

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    context: Arc<ServerContext>,
    next_connection: AtomicU64,
}

impl IpcServer {
    /// Bind the socket, replacing a stale socket file
    pub fn bind(
        socket_path: &Path,
        manager: Arc<ConnectionManager>,
        shutdown_requests: Sender<()>,
        max_frame_size: usize,
    ) -> AppResult<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(|e| AppError::Socket {
                path: socket_path.to_path_buf(),
                operation: "remove stale socket".to_string(),
                source: Some(Box::new(e)),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| AppError::Socket {
            path: socket_path.to_path_buf(),
            operation: "bind".to_string(),
            source: Some(Box::new(e)),
        })?;

        info!("IPC server bound to socket: {}", socket_path.display());

        Ok(IpcServer {
            listener,
            socket_path: socket_path.to_path_buf(),
            context: Arc::new(ServerContext {
                manager,
                shutdown_requests,
                start_time: Instant::now(),
                max_frame_size,
            }),
            next_connection: AtomicU64::new(1),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `stop` fires
    pub async fn run(self, stop: Receiver<()>) -> AppResult<()> {
        info!("IPC server started");

        loop {
            tokio::select! {
                _ = stop.recv_async() => {
                    info!("IPC server received shutdown signal");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
                            debug!("New IPC connection {}", connection);
                            let context = Arc::clone(&self.context);
                            tokio::spawn(handle_connection(stream, connection, context));
                        }
                        Err(e) => {
                            error!("Failed to accept IPC connection: {}", e);
                        }
                    }
                }
            }
        }

        info!("IPC server stopped");
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, connection: ConnectionId, context: Arc<ServerContext>) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, outbox_rx) = flume::unbounded::<ServerMessage>();
    let (calls, calls_rx) = flume::unbounded::<ClientMessage>();
    let max_frame_size = context.max_frame_size;

    let clients = Arc::clone(context.manager.clients());
    tokio::spawn(async move {
        while let Ok(message) = outbox_rx.recv_async().await {
            match write_frame(&mut writer, &message, max_frame_size).await {
                Ok(()) => {}
                Err(AppError::FrameTooLarge { size, limit }) => {
                    warn!(
                        "Connection {}: dropping {} byte reply over the {} byte limit",
                        connection, size, limit
                    );
                }
                Err(e) => {
                    debug!("Connection {} write failed: {}", connection, e);
                    break;
                }
            }
        }
        clients.connection_became_invalid(connection);
    });

    let (commands, commands_rx) = flume::unbounded::<QueuedCommand>();
    let worker = tokio::spawn(run_commands(
        commands_rx,
        outbox.clone(),
        Arc::clone(&context.manager),
    ));
    let dispatcher = tokio::spawn(dispatch(
        connection,
        calls_rx,
        commands,
        outbox.clone(),
        Arc::clone(&context),
    ));

    loop {
        match read_frame::<_, ClientMessage>(&mut reader, max_frame_size).await {
            Ok(Some(message)) => {
                if calls.send(message).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Connection {} closed by peer", connection);
                break;
            }
            Err(e) => {
                warn!("Connection {} dropped: {}", connection, e);
                break;
            }
        }
    }

    drop(calls);
    context.manager.clients().connection_became_invalid(connection);
    if let Err(e) = dispatcher.await {
        error!("Dispatcher for connection {} failed: {}", connection, e);
    }
    if let Err(e) = worker.await {
        error!("Command worker for connection {} failed: {}", connection, e);
    }
    // Calls queued before the disconnect may have registered clients again
    context.manager.clients().connection_became_invalid(connection);
}

/// Run one connection's commands in the order they were accepted
async fn run_commands(
    commands: Receiver<QueuedCommand>,
    outbox: Sender<ServerMessage>,
    manager: Arc<ConnectionManager>,
) {
    while let Ok(queued) = commands.recv_async().await {
        let result = manager
            .run_command(queued.handle, queued.command, &queued.data)
            .await;
        let _ = outbox.send(ServerMessage::CommandResult {
            client: queued.client,
            command: queued.command,
            error: result.err().map(|e| e.to_string()),
        });
    }
}

async fn dispatch(
    connection: ConnectionId,
    calls: Receiver<ClientMessage>,
    commands: Sender<QueuedCommand>,
    outbox: Sender<ServerMessage>,
    context: Arc<ServerContext>,
) {
    let manager = &context.manager;
    let handle = |client| ClientHandle::new(connection, client);

    while let Ok(message) = calls.recv_async().await {
        debug!("Connection {}: {:?}", connection, message);

        match message {
            ClientMessage::RegisterClient { client } => {
                manager.clients().register_client(handle(client), outbox.clone());
            }
            ClientMessage::UnregisterClient { client } => {
                manager.clients().unregister_client(handle(client));
            }
            ClientMessage::AddWatcherForEvent { client, event } => {
                manager
                    .clients()
                    .add_watcher_for_event(handle(client), EventMask::from_bits(event));
            }
            ClientMessage::AddWatcherForEvents { client, events } => {
                manager
                    .clients()
                    .add_watcher_for_events(handle(client), EventMask::from_bits(events));
            }
            ClientMessage::RemoveWatcherForEvent { client, event } => {
                manager
                    .clients()
                    .remove_watcher_for_event(handle(client), EventMask::from_bits(event));
            }
            ClientMessage::ExecuteCommand { client, command, data } => {
                // Registration counts at the time of the call; a later
                // unregister does not cancel an accepted command
                let handle = handle(client);
                if !manager.clients().is_registered(handle) {
                    debug!("Ignoring command from unregistered client {}", handle);
                    continue;
                }
                let queued = QueuedCommand {
                    handle,
                    client,
                    command,
                    data,
                };
                if commands.send(queued).is_err() {
                    warn!("Command worker for connection {} stopped", connection);
                }
            }
            ClientMessage::GetMountedVolumes { request } => match manager.get_mounted_volumes() {
                Ok(data) => {
                    let _ = outbox.send(ServerMessage::MountedVolumes { request, data });
                }
                Err(e) => warn!("Failed to encode mounted volumes: {}", e),
            },
            ClientMessage::Ping => {
                let _ = outbox.send(ServerMessage::Pong);
            }
            ClientMessage::Status { request } => {
                let _ = outbox.send(ServerMessage::Status {
                    request,
                    clients: manager.clients().client_count(),
                    volumes: manager.volumes().volume_count(),
                    uptime_secs: context.start_time.elapsed().as_secs(),
                });
            }
            ClientMessage::Shutdown => {
                info!("Received shutdown request via IPC");
                if let Err(e) = context.shutdown_requests.send(()) {
                    warn!("Failed to forward shutdown request: {}", e);
                }
            }
        }
    }
}
