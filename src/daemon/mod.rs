//! Daemon side of the volume manager
//!
//! This module provides:
//! - The client registry and the connection manager that routes client calls
//! - The Unix socket IPC server
//! - The daemon runner tying hardware signals, volumes and clients together

pub mod connection;
pub mod ipc;
pub mod ipc_server;
pub mod server;
pub mod shared;

pub use connection::{
    ClientHandle, ClientInfo, ClientRegistry, ConnectionId, ConnectionManager, DecisionProvider,
    NoDecision,
};
pub use ipc::{create_socket_path, is_process_running, pid_file_path};
pub use ipc_server::IpcServer;
pub use server::{pump_hardware_signals, VolumeDaemon};
pub use shared::{ClientMessage, ClientToken, ServerMessage};
