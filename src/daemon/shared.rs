//! Wire messages between the daemon and its clients
//!
//! Both directions use the same framing (see [`crate::shared::ipc`]). The
//! volume calls are one-way: the daemon never answers `RegisterClient`,
//! watcher changes or `ExecuteCommand` with a reply frame.
//! `GetMountedVolumes` and the admin calls carry a request number that the
//! reply echoes.

use serde::{Deserialize, Serialize};

/// Client token, chosen by the client and unique within its connection
pub type ClientToken = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    RegisterClient { client: ClientToken },
    UnregisterClient { client: ClientToken },
    AddWatcherForEvent { client: ClientToken, event: u32 },
    AddWatcherForEvents { client: ClientToken, events: u32 },
    RemoveWatcherForEvent { client: ClientToken, event: u32 },
    ExecuteCommand {
        client: ClientToken,
        command: u32,
        data: Vec<u8>,
    },
    GetMountedVolumes { request: u64 },
    Ping,
    Status { request: u64 },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// `volumeDidChange` callback; `data` is an encoded `VolumeChangeInfo`
    VolumeDidChange { client: ClientToken, data: Vec<u8> },
    /// Outcome of an `ExecuteCommand`, sent to the issuing connection only
    CommandResult {
        client: ClientToken,
        command: u32,
        error: Option<String>,
    },
    /// `data` is an encoded `BTreeMap<String, MountedVolume>`
    MountedVolumes { request: u64, data: Vec<u8> },
    Pong,
    Status {
        request: u64,
        clients: usize,
        volumes: usize,
        uptime_secs: u64,
    },
}
