//! Client bookkeeping
//!
//! [`ClientRegistry`] owns every registered client and its event mask and
//! fans volume events out to them. [`ConnectionManager`] is the surface the
//! IPC server talks to: it routes client calls to the registry or to the
//! [`VolumeManager`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::shared::{ClientToken, ServerMessage};
use crate::errors::AppResult;
use crate::events::{decode_payload, encode_payload, Command, CommandData, EventMask};
use crate::volume::{VolumeChangeInfo, VolumeEventSink, VolumeManager};

/// Identifies one IPC connection for its whole lifetime
pub type ConnectionId = u64;

/// A client object living on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientHandle {
    pub connection: ConnectionId,
    pub client: ClientToken,
}

impl ClientHandle {
    pub fn new(connection: ConnectionId, client: ClientToken) -> Self {
        ClientHandle { connection, client }
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection, self.client)
    }
}

/// Per-client state: the watched events and the connection's outbound queue
#[derive(Debug, Clone)]
pub struct ClientInfo {
    events: EventMask,
    outbox: flume::Sender<ServerMessage>,
}

impl ClientInfo {
    pub fn new(outbox: flume::Sender<ServerMessage>) -> Self {
        ClientInfo {
            events: EventMask::NONE,
            outbox,
        }
    }

    pub fn events(&self) -> EventMask {
        self.events
    }

    pub fn set_events(&mut self, events: EventMask) {
        self.events = events;
    }

    pub fn set_event(&mut self, event: EventMask) {
        self.events.insert(event);
    }

    pub fn unset_event(&mut self, event: EventMask) {
        self.events.remove(event);
    }

    pub fn watches_event(&self, event: EventMask) -> bool {
        self.events.intersects(event)
    }
}

/// Surface that lets a user pick between playing and mounting media
pub trait DecisionProvider: Send + Sync {
    fn request_play_or_mount(&self, info: &VolumeChangeInfo) -> Command;
}

/// Nobody is asked; ambiguous media is left alone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecision;

impl DecisionProvider for NoDecision {
    fn request_play_or_mount(&self, _info: &VolumeChangeInfo) -> Command {
        Command::Noop
    }
}

pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientHandle, ClientInfo>>,
    decisions: Arc<dyn DecisionProvider>,
}

impl ClientRegistry {
    pub fn new(decisions: Arc<dyn DecisionProvider>) -> Self {
        ClientRegistry {
            clients: Mutex::new(BTreeMap::new()),
            decisions,
        }
    }

    fn clients(&self) -> MutexGuard<'_, BTreeMap<ClientHandle, ClientInfo>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `client`; a second registration keeps the existing mask
    pub fn register_client(&self, client: ClientHandle, outbox: flume::Sender<ServerMessage>) {
        let mut clients = self.clients();
        if clients.contains_key(&client) {
            debug!("Client {} already registered", client);
            return;
        }
        clients.insert(client, ClientInfo::new(outbox));
        info!("Client {} registered ({} total)", client, clients.len());
    }

    pub fn unregister_client(&self, client: ClientHandle) {
        if self.clients().remove(&client).is_some() {
            info!("Client {} unregistered", client);
        }
    }

    fn update(&self, client: ClientHandle, f: impl FnOnce(&mut ClientInfo)) {
        match self.clients().get_mut(&client) {
            Some(info) => {
                f(info);
                debug!("Client {} now watches {}", client, info.events());
            }
            None => debug!("Ignoring watcher change for unknown client {}", client),
        }
    }

    pub fn add_watcher_for_event(&self, client: ClientHandle, event: EventMask) {
        self.update(client, |info| info.set_event(event));
    }

    pub fn add_watcher_for_events(&self, client: ClientHandle, events: EventMask) {
        self.update(client, |info| info.set_event(events));
    }

    pub fn remove_watcher_for_event(&self, client: ClientHandle, event: EventMask) {
        self.update(client, |info| info.unset_event(event));
    }

    pub fn client_info_for_client(&self, client: ClientHandle) -> Option<ClientInfo> {
        self.clients().get(&client).cloned()
    }

    pub fn is_registered(&self, client: ClientHandle) -> bool {
        self.clients().contains_key(&client)
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Drop every client living on `connection`. Returns how many were removed.
    pub fn connection_became_invalid(&self, connection: ConnectionId) -> usize {
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|handle, _| handle.connection != connection);
        let removed = before - clients.len();
        if removed > 0 {
            info!("Connection {} closed, removed {} clients", connection, removed);
        }
        removed
    }
}

impl VolumeEventSink for ClientRegistry {
    fn notify_clients_for_event(&self, event: EventMask, info: &VolumeChangeInfo) {
        let data = match encode_payload(info) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping {} notification for {}: {}", event, info.device, e);
                return;
            }
        };

        let mut clients = self.clients();
        let mut dead = Vec::new();
        for (handle, client) in clients.iter() {
            if !client.watches_event(event) {
                continue;
            }
            let message = ServerMessage::VolumeDidChange {
                client: handle.client,
                data: data.clone(),
            };
            if client.outbox.send(message).is_err() {
                dead.push(handle.connection);
            }
        }

        if !dead.is_empty() {
            clients.retain(|handle, _| !dead.contains(&handle.connection));
            debug!("Evicted clients of closed connections {:?}", dead);
        }
    }

    fn request_play_or_mount_from_user(&self, info: &VolumeChangeInfo) -> Command {
        self.decisions.request_play_or_mount(info)
    }
}

/// Routes client calls to the registries they act on
pub struct ConnectionManager {
    clients: Arc<ClientRegistry>,
    volumes: Arc<VolumeManager>,
}

impl ConnectionManager {
    pub fn new(clients: Arc<ClientRegistry>, volumes: Arc<VolumeManager>) -> Self {
        ConnectionManager { clients, volumes }
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }

    /// Run a client command. Calls from unregistered clients are ignored.
    pub async fn execute_command(
        &self,
        client: ClientHandle,
        command: u32,
        data: &[u8],
    ) -> AppResult<()> {
        if !self.clients.is_registered(client) {
            debug!("Ignoring command from unregistered client {}", client);
            return Ok(());
        }
        self.run_command(client, command, data).await
    }

    /// Run a command whose sender was registered when it was accepted
    pub async fn run_command(
        &self,
        client: ClientHandle,
        command: u32,
        data: &[u8],
    ) -> AppResult<()> {
        let command = Command::try_from(command)?;
        let data: CommandData = decode_payload(data)?;
        info!("Client {} requested {} on {}", client, command, data.device);

        let result = self.volumes.execute(command, &data.device).await;
        if let Err(e) = &result {
            warn!("{} of {} for client {} failed: {}", command, data.device, client, e);
        }
        result
    }

    /// Encoded snapshot of the mounted volumes
    pub fn get_mounted_volumes(&self) -> AppResult<Vec<u8>> {
        encode_payload(&self.volumes.get_mounted_volumes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::hardware::{MemoryDevice, MemoryHardware, RecordingExecutor};
    use crate::volume::{MediaKind, MountedVolume, Volume};

    fn info(event: EventMask) -> VolumeChangeInfo {
        Volume::new("udi-a", "/dev/sdb1", "USB", MediaKind::Filesystem).change_info(event)
    }

    fn received(rx: &flume::Receiver<ServerMessage>) -> Vec<EventMask> {
        rx.drain()
            .filter_map(|message| match message {
                ServerMessage::VolumeDidChange { data, .. } => {
                    decode_payload::<VolumeChangeInfo>(&data).ok().map(|i| i.event())
                }
                _ => None,
            })
            .collect()
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(NoDecision))
    }

    #[test]
    fn test_delivers_only_watched_events() {
        let registry = registry();
        let (tx, rx) = flume::unbounded();
        let client = ClientHandle::new(1, 7);
        registry.register_client(client, tx);
        registry.add_watcher_for_events(
            client,
            EventMask::VOLUME_MOUNTED | EventMask::VOLUME_REMOVED,
        );

        for event in EventMask::EVENTS {
            registry.notify_clients_for_event(event, &info(event));
        }
        assert_eq!(
            received(&rx),
            vec![EventMask::VOLUME_MOUNTED, EventMask::VOLUME_REMOVED]
        );

        registry.remove_watcher_for_event(client, EventMask::VOLUME_MOUNTED);
        registry.notify_clients_for_event(
            EventMask::VOLUME_MOUNTED,
            &info(EventMask::VOLUME_MOUNTED),
        );
        assert!(received(&rx).is_empty());
    }

    #[test]
    fn test_unknown_clients_are_ignored() {
        let registry = registry();
        let client = ClientHandle::new(1, 1);

        registry.add_watcher_for_event(client, EventMask::VOLUME_MOUNTED);
        registry.remove_watcher_for_event(client, EventMask::VOLUME_MOUNTED);
        registry.unregister_client(client);

        assert!(registry.client_info_for_client(client).is_none());
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = registry();
        let (tx, _rx) = flume::unbounded();
        let client = ClientHandle::new(3, 1);

        registry.register_client(client, tx.clone());
        registry.add_watcher_for_event(client, EventMask::VOLUME_ATTACHED);
        registry.register_client(client, tx);

        let info = registry.client_info_for_client(client).unwrap();
        assert_eq!(info.events(), EventMask::VOLUME_ATTACHED);
        assert!(info.watches_event(EventMask::VOLUME_ATTACHED));
    }

    #[test]
    fn test_connection_invalidation_evicts_all_clients() {
        let registry = registry();
        let (tx, _rx) = flume::unbounded();
        let (other_tx, _other_rx) = flume::unbounded();
        registry.register_client(ClientHandle::new(1, 1), tx.clone());
        registry.register_client(ClientHandle::new(1, 2), tx);
        registry.register_client(ClientHandle::new(2, 1), other_tx);

        assert_eq!(registry.connection_became_invalid(1), 2);
        assert_eq!(registry.connection_became_invalid(1), 0);
        assert!(registry.client_info_for_client(ClientHandle::new(1, 1)).is_none());
        assert!(registry.is_registered(ClientHandle::new(2, 1)));
    }

    #[test]
    fn test_closed_outbox_evicts_connection() {
        let registry = registry();
        let (tx, rx) = flume::unbounded();
        let client = ClientHandle::new(5, 1);
        registry.register_client(client, tx);
        registry.add_watcher_for_events(client, EventMask::ALL_EVENTS);
        drop(rx);

        registry.notify_clients_for_event(
            EventMask::VOLUME_ATTACHED,
            &info(EventMask::VOLUME_ATTACHED),
        );
        assert!(!registry.is_registered(client));
    }

    fn manager() -> (ConnectionManager, Arc<MemoryHardware>) {
        let hardware = Arc::new(MemoryHardware::new());
        let executor = Arc::new(RecordingExecutor::with_hardware(hardware.clone()));
        let clients = Arc::new(registry());
        let volumes = Arc::new(VolumeManager::new(
            hardware.clone(),
            executor,
            clients.clone(),
            PolicyConfig::default(),
        ));
        (ConnectionManager::new(clients, volumes), hardware)
    }

    fn command_data(device: &str) -> Vec<u8> {
        encode_payload(&CommandData::for_device(device)).unwrap()
    }

    #[tokio::test]
    async fn test_unregistered_client_commands_have_no_effect() {
        let (manager, hardware) = manager();
        hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").mounted_at("/media/a"));
        manager.volumes().discover();

        let (tx, rx) = flume::unbounded();
        let client = ClientHandle::new(1, 1);
        manager.clients().register_client(client, tx);
        manager.clients().add_watcher_for_events(client, EventMask::ALL_EVENTS);
        manager.clients().unregister_client(client);

        manager
            .execute_command(client, Command::Unmount.wire_value(), &command_data("udi-a"))
            .await
            .unwrap();
        assert!(manager.volumes().volume("udi-a").unwrap().is_mounted());
        assert!(rx.drain().next().is_none());
    }

    #[tokio::test]
    async fn test_execute_unmount_notifies_watchers() {
        let (manager, hardware) = manager();
        hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").mounted_at("/media/a"));
        manager.volumes().discover();

        let (tx, rx) = flume::unbounded();
        let client = ClientHandle::new(1, 1);
        manager.clients().register_client(client, tx);
        manager
            .clients()
            .add_watcher_for_event(client, EventMask::VOLUME_UNMOUNTED);

        manager
            .execute_command(client, Command::Unmount.wire_value(), &command_data("udi-a"))
            .await
            .unwrap();
        assert_eq!(received(&rx), vec![EventMask::VOLUME_UNMOUNTED]);

        assert!(manager.execute_command(client, 42, &command_data("udi-a")).await.is_err());
        assert!(manager
            .execute_command(client, Command::Mount.wire_value(), b"junk")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mounted_volumes_reply() {
        let (manager, hardware) = manager();
        hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").label("A").mounted_at("/media/a"));
        hardware.insert("udi-b", MemoryDevice::volume("/dev/sdc1").label("B"));
        manager.volumes().discover();

        let data = manager.get_mounted_volumes().unwrap();
        let mounted: BTreeMap<String, MountedVolume> = decode_payload(&data).unwrap();
        assert_eq!(mounted.len(), 1);
        assert_eq!(mounted["udi-a"].label, "A");
    }
}
