//! Socket round trips against an in-process daemon

mod common;

use common::{eventually, manual_config, next_notification, TestDaemon};
use std::sync::Arc;
use std::time::Duration;
use volume_manager::config::Config;
use volume_manager::events::{Command, EventMask};
use volume_manager::hardware::{ExecutorCall, HardwareSignal, MemoryDevice, MemoryHardware};
use volume_manager::volume::MediaKind;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_hardware_signal_reaches_watching_client() {
    let hardware = Arc::new(MemoryHardware::new());
    let daemon = TestDaemon::start(manual_config(), hardware.clone()).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client
        .add_watcher_for_events(1, EventMask::VOLUME_ATTACHED | EventMask::VOLUME_REMOVED)
        .await
        .unwrap();
    // Calls on one connection are applied in order, so this reply means
    // the watcher is in place
    client.status().await.unwrap();

    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").label("USB"));
    daemon.signal(HardwareSignal::DeviceAdded("udi-a".to_string()));

    let attached = next_notification(&client).await;
    assert_eq!(attached.client, 1);
    assert_eq!(attached.info.event(), EventMask::VOLUME_ATTACHED);
    assert_eq!(attached.info.device, "udi-a");
    assert_eq!(attached.info.label, "USB");
    assert_eq!(attached.info.device_path, "/dev/sdb1");
    assert_eq!(attached.info.media, MediaKind::Filesystem);

    hardware.remove("udi-a");
    daemon.signal(HardwareSignal::DeviceRemoved("udi-a".to_string()));

    let removed = next_notification(&client).await;
    assert_eq!(removed.info.event(), EventMask::VOLUME_REMOVED);
    assert!(client.notifications().is_empty());
    assert!(daemon.executor.calls().is_empty());

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_only_matching_clients_are_notified() {
    let hardware = Arc::new(MemoryHardware::new());
    let daemon = TestDaemon::start(manual_config(), hardware.clone()).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.register_client(2).await.unwrap();
    client.add_watcher_for_events(1, EventMask::ALL_EVENTS).await.unwrap();
    client.add_watcher_for_event(2, EventMask::VOLUME_MOUNTED).await.unwrap();
    client.add_watcher_for_event(2, EventMask::VOLUME_ATTACHED).await.unwrap();
    client.remove_watcher_for_event(2, EventMask::VOLUME_ATTACHED).await.unwrap();
    client.status().await.unwrap();

    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1"));
    daemon.signal(HardwareSignal::DeviceAdded("udi-a".to_string()));

    let first = next_notification(&client).await;
    assert_eq!((first.client, first.info.event()), (1, EventMask::VOLUME_ATTACHED));

    // The mount is reported by the kernel after the fact
    hardware.set_mounted("udi-a", Some("/media/usb"));
    daemon.signal(HardwareSignal::PropertyModified {
        device: "udi-a".to_string(),
        property: "volume.mount_point".to_string(),
    });

    let mut mounted = vec![next_notification(&client).await, next_notification(&client).await];
    mounted.sort_by_key(|n| n.client);
    assert_eq!(mounted[0].client, 1);
    assert_eq!(mounted[1].client, 2);
    for notification in &mounted {
        assert_eq!(notification.info.event(), EventMask::VOLUME_MOUNTED);
        assert_eq!(notification.info.mount_point, "/media/usb");
    }

    client.status().await.unwrap();
    assert!(client.notifications().is_empty());
}

#[tokio::test]
async fn test_startup_automount_and_mounted_volumes() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").label("USB"));
    hardware.insert("udi-b", MemoryDevice::volume("/dev/sdc1").label("CARD"));
    hardware.insert("udi-c", MemoryDevice::volume("/dev/sdd1").mounted_at("/mnt/data"));

    let daemon = TestDaemon::start(Config::default(), hardware).await;
    let client = daemon.client().await;

    let mounted = client.get_mounted_volumes().await.unwrap();
    assert_eq!(
        mounted.keys().cloned().collect::<Vec<_>>(),
        vec!["udi-a".to_string(), "udi-b".to_string(), "udi-c".to_string()]
    );
    assert_eq!(mounted["udi-a"].label, "USB");
    assert_eq!(mounted["udi-a"].mount_point, "/media/sdb1");
    assert_eq!(mounted["udi-c"].mount_point, "/mnt/data");

    // Already mounted volumes are left alone
    let calls = daemon.executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls.contains(&ExecutorCall::Mount("/dev/sdd1".to_string())));

    let status = client.status().await.unwrap();
    assert_eq!(status.volumes, 3);
    assert_eq!(status.clients, 0);
}

#[tokio::test]
async fn test_unmount_command_success_and_failure() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").mounted_at("/media/a"));
    hardware.insert("udi-b", MemoryDevice::volume("/dev/sdc1").mounted_at("/media/b"));
    let daemon = TestDaemon::start(manual_config(), hardware).await;

    let client = daemon.client().await;
    client.register_client(7).await.unwrap();
    client.add_watcher_for_event(7, EventMask::VOLUME_UNMOUNTED).await.unwrap();

    client
        .execute_and_wait(7, Command::Unmount, "/dev/sdb1", WAIT)
        .await
        .unwrap();
    let unmounted = next_notification(&client).await;
    assert_eq!(unmounted.info.device, "udi-a");
    assert_eq!(unmounted.info.event(), EventMask::VOLUME_UNMOUNTED);
    assert!(!unmounted.info.daemon_initiated);

    daemon.executor.fail("/dev/sdc1");
    let failed = client
        .execute_and_wait(7, Command::Unmount, "/dev/sdc1", WAIT)
        .await;
    assert!(failed.is_err());

    let mounted = client.get_mounted_volumes().await.unwrap();
    assert_eq!(mounted.keys().cloned().collect::<Vec<_>>(), vec!["udi-b".to_string()]);
    assert!(client.notifications().is_empty());

    let unknown = client
        .execute_and_wait(7, Command::Unmount, "/dev/nope", WAIT)
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn test_eject_unmounts_then_removes() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sr0").mounted_at("/media/cd"));
    let daemon = TestDaemon::start(manual_config(), hardware).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.add_watcher_for_events(1, EventMask::ALL_EVENTS).await.unwrap();

    client
        .execute_and_wait(1, Command::Eject, "udi-a", WAIT)
        .await
        .unwrap();

    let unmounted = next_notification(&client).await;
    assert_eq!(unmounted.info.event(), EventMask::VOLUME_UNMOUNTED);
    assert!(unmounted.info.daemon_initiated);
    let removed = next_notification(&client).await;
    assert_eq!(removed.info.event(), EventMask::VOLUME_REMOVED);

    assert_eq!(
        daemon.executor.calls(),
        vec![
            ExecutorCall::Unmount("/dev/sr0".to_string()),
            ExecutorCall::Eject("/dev/sr0".to_string()),
        ]
    );
    assert_eq!(daemon.manager.volumes().volume_count(), 0);
}

#[tokio::test]
async fn test_unregistered_client_commands_are_ignored() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1"));
    let daemon = TestDaemon::start(manual_config(), hardware).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.add_watcher_for_events(1, EventMask::ALL_EVENTS).await.unwrap();
    client.unregister_client(1).await.unwrap();
    client.execute_command(1, Command::Mount, "/dev/sdb1").await.unwrap();
    client.status().await.unwrap();

    // Give a wrongly spawned command a chance to run
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(daemon.executor.calls().is_empty());
    assert!(client.notifications().is_empty());
    assert!(client.get_mounted_volumes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_evicts_clients() {
    let hardware = Arc::new(MemoryHardware::new());
    let daemon = TestDaemon::start(manual_config(), hardware.clone()).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.register_client(2).await.unwrap();
    client.add_watcher_for_events(1, EventMask::ALL_EVENTS).await.unwrap();
    assert_eq!(client.status().await.unwrap().clients, 2);

    let observer = daemon.client().await;
    drop(client);

    let clients = Arc::clone(daemon.manager.clients());
    eventually(|| clients.client_count() == 0).await;
    assert_eq!(observer.status().await.unwrap().clients, 0);

    // Hardware keeps flowing with nobody to deliver to
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1"));
    daemon.signal(HardwareSignal::DeviceAdded("udi-a".to_string()));
    let volumes = Arc::clone(daemon.manager.volumes());
    eventually(|| volumes.volume_count() == 1).await;
}

#[tokio::test]
async fn test_client_shutdown_request_unmounts_on_exit() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").mounted_at("/media/a"));
    let mut config = manual_config();
    config.policy.unmount_on_exit = true;

    let daemon = TestDaemon::start(config, hardware).await;
    let socket_path = daemon.socket_path.clone();
    let executor = Arc::clone(&daemon.executor);

    let client = daemon.client().await;
    client.ping().await.unwrap();
    client.shutdown().await.unwrap();

    daemon.join().await.unwrap();
    assert!(!socket_path.exists());
    assert_eq!(executor.calls(), vec![ExecutorCall::Unmount("/dev/sdb1".to_string())]);
}

#[tokio::test]
async fn test_command_accepted_before_unregister_still_runs() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").mounted_at("/media/a"));
    let daemon = TestDaemon::start(manual_config(), hardware).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.status().await.unwrap();
    client.execute_command(1, Command::Unmount, "udi-a").await.unwrap();
    client.unregister_client(1).await.unwrap();
    assert_eq!(client.status().await.unwrap().clients, 0);

    let executor = Arc::clone(&daemon.executor);
    eventually(|| executor.calls() == vec![ExecutorCall::Unmount("/dev/sdb1".to_string())]).await;
    let volumes = Arc::clone(daemon.manager.volumes());
    eventually(|| volumes.get_mounted_volumes().is_empty()).await;
}

#[tokio::test]
async fn test_commands_on_one_connection_run_in_order() {
    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").label("USB"));
    let daemon = TestDaemon::start(manual_config(), hardware).await;

    let client = daemon.client().await;
    client.register_client(1).await.unwrap();
    client.add_watcher_for_events(1, EventMask::ALL_EVENTS).await.unwrap();
    client.execute_command(1, Command::Mount, "udi-a").await.unwrap();
    client.execute_command(1, Command::Eject, "udi-a").await.unwrap();

    let events: Vec<EventMask> = [
        next_notification(&client).await,
        next_notification(&client).await,
        next_notification(&client).await,
    ]
    .iter()
    .map(|n| n.info.event())
    .collect();
    assert_eq!(
        events,
        vec![
            EventMask::VOLUME_MOUNTED,
            EventMask::VOLUME_UNMOUNTED,
            EventMask::VOLUME_REMOVED,
        ]
    );
    assert_eq!(
        daemon.executor.calls(),
        vec![
            ExecutorCall::Mount("/dev/sdb1".to_string()),
            ExecutorCall::Unmount("/dev/sdb1".to_string()),
            ExecutorCall::Eject("/dev/sdb1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_oversized_reply_keeps_connection_open() {
    let hardware = Arc::new(MemoryHardware::new());
    for i in 0..16 {
        let label = format!("A VOLUME WITH A RATHER LONG LABEL {i}");
        hardware.insert(
            &format!("udi-{i}"),
            MemoryDevice::volume(&format!("/dev/sd{i}1"))
                .label(&label)
                .mounted_at(&format!("/media/a-rather-long-mount-point-{i}")),
        );
    }
    let mut config = manual_config();
    config.daemon.max_frame_size = 256;
    let daemon = TestDaemon::start(config, hardware).await;

    let client = daemon.client().await;
    let reply = tokio::time::timeout(Duration::from_millis(300), client.get_mounted_volumes()).await;
    assert!(reply.is_err(), "reply should have been dropped");

    let status = client.status().await.unwrap();
    assert_eq!(status.volumes, 16);
}
