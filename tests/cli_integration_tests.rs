mod common;

use common::{manual_config, TestCommand, TestDaemon, TestEnvironment};
use std::sync::Arc;
use volume_manager::config::ConfigManager;
use volume_manager::hardware::{ExecutorCall, MemoryDevice, MemoryHardware};

#[test]
fn test_cli_help() {
    TestCommand::new()
        .arg("--help")
        .expect_success()
        .stdout_contains("Removable volume session daemon")
        .stdout_contains("watch")
        .done();
}

#[test]
fn test_cli_version() {
    TestCommand::new()
        .arg("--version")
        .expect_success()
        .stdout_contains("volume-manager")
        .done();
}

#[test]
fn test_init_command() {
    let env = TestEnvironment::new();

    env.command()
        .arg("init")
        .expect_success()
        .stdout_contains("Configuration initialized successfully")
        .done();
    assert!(env.config_path().exists());

    env.command()
        .arg("init")
        .expect_success()
        .stdout_contains("already initialized")
        .done();

    env.command()
        .args(["init", "--force"])
        .expect_success()
        .stdout_contains("Configuration initialized successfully")
        .done();
}

#[test]
fn test_config_set_and_get() {
    let env = TestEnvironment::new();

    env.command()
        .args(["config", "set", "policy.autoplay_dvds", "true"])
        .expect_success()
        .stdout_contains("policy.autoplay_dvds = true")
        .done();

    env.command()
        .args(["config", "get", "policy.autoplay_dvds"])
        .expect_success()
        .stdout_contains("true")
        .done();

    let manager = ConfigManager::new(Some(env.local_dir())).unwrap();
    assert!(manager.config().policy.autoplay_dvds);

    env.command()
        .args(["config", "show"])
        .expect_success()
        .stdout_contains("[policy]")
        .stdout_contains("autoplay_dvds = true")
        .done();
}

#[test]
fn test_config_rejects_bad_input() {
    let env = TestEnvironment::new();

    env.command()
        .args(["config", "get", "mount.options"])
        .expect_failure()
        .stderr_contains("Unknown configuration key")
        .done();

    env.command()
        .args(["config", "set", "policy.automount_drives", "sometimes"])
        .expect_failure()
        .done();

    env.command()
        .args(["config", "keys"])
        .expect_success()
        .stdout_contains("policy.autoplay_cda_service")
        .done();
}

#[test]
fn test_daemon_status_not_running() {
    let env = TestEnvironment::new();

    env.command()
        .args(["daemon", "status"])
        .expect_success()
        .stdout_contains("Daemon is not running")
        .done();

    env.command()
        .args(["daemon", "stop"])
        .expect_success()
        .stdout_contains("Daemon is not running")
        .done();
}

#[test]
fn test_client_commands_need_a_daemon() {
    let env = TestEnvironment::new();

    env.command()
        .arg("list")
        .expect_failure()
        .stderr_contains("Cannot reach the daemon")
        .done();

    env.command()
        .args(["unmount", "/dev/sdb1"])
        .expect_failure()
        .done();
}

#[test]
fn test_watch_rejects_unknown_event() {
    let env = TestEnvironment::new();

    env.command()
        .args(["watch", "--events", "mounted,exploded"])
        .expect_failure()
        .stderr_contains("exploded")
        .done();
}

#[tokio::test]
async fn test_list_and_unmount_against_running_daemon() {
    let env = TestEnvironment::new();
    std::fs::create_dir_all(env.local_dir()).unwrap();

    let hardware = Arc::new(MemoryHardware::new());
    hardware.insert("udi-a", MemoryDevice::volume("/dev/sdb1").label("USB").mounted_at("/media/usb"));
    let daemon = TestDaemon::start_at(manual_config(), hardware, env.socket_path()).await;

    let base_dir = env.base_dir().to_path_buf();
    tokio::task::spawn_blocking(move || {
        TestCommand::new()
            .arg("--config-dir")
            .arg(&base_dir)
            .arg("list")
            .expect_success()
            .stdout_contains("udi-a\tUSB\t/media/usb")
            .done();

        TestCommand::new()
            .arg("--config-dir")
            .arg(&base_dir)
            .args(["unmount", "/dev/sdb1"])
            .expect_success()
            .stdout_contains("unmount /dev/sdb1: done")
            .done();

        TestCommand::new()
            .arg("--config-dir")
            .arg(&base_dir)
            .arg("list")
            .expect_success()
            .stdout_contains("No mounted volumes")
            .done();
    })
    .await
    .unwrap();

    assert_eq!(daemon.executor.calls(), vec![ExecutorCall::Unmount("/dev/sdb1".to_string())]);
    daemon.stop().await.unwrap();
}
