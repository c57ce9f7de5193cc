//! Common test utilities and helpers
//!
//! `TestCommand`/`TestEnvironment` drive the `volume-manager` binary;
//! `TestDaemon` runs a daemon in-process on top of in-memory hardware.

#![allow(dead_code)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use volume_manager::config::Config;
use volume_manager::daemon::{ConnectionManager, VolumeDaemon};
use volume_manager::errors::AppResult;
use volume_manager::hardware::{HardwareSignal, MemoryHardware, RecordingExecutor};
use volume_manager::shared::{Notification, VolumeManagerClient};

/// Test command builder for the volume-manager CLI
pub struct TestCommand {
    cmd: Command,
}

impl TestCommand {
    pub fn new() -> Self {
        let cmd = Command::cargo_bin("volume-manager").expect("Failed to find volume-manager binary");
        Self { cmd }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.cmd.arg(arg.as_ref());
        }
        self
    }

    pub fn arg<S: AsRef<std::ffi::OsStr>>(mut self, arg: S) -> Self {
        self.cmd.arg(arg);
        self
    }

    pub fn expect_success(mut self) -> TestAssertion {
        let assert = self.cmd.assert().success();
        TestAssertion { assert }
    }

    pub fn expect_failure(mut self) -> TestAssertion {
        let assert = self.cmd.assert().failure();
        TestAssertion { assert }
    }
}

impl Default for TestCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Test assertion wrapper with convenient methods
pub struct TestAssertion {
    assert: assert_cmd::assert::Assert,
}

impl TestAssertion {
    pub fn stdout_contains<S: AsRef<str>>(self, text: S) -> Self {
        let assert = self.assert.stdout(predicate::str::contains(text.as_ref()));
        Self { assert }
    }

    pub fn stderr_contains<S: AsRef<str>>(self, text: S) -> Self {
        let assert = self.assert.stderr(predicate::str::contains(text.as_ref()));
        Self { assert }
    }

    pub fn done(self) -> assert_cmd::assert::Assert {
        self.assert
    }
}

/// A temporary `--config-dir`
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self { temp_dir }
    }

    pub fn base_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// `<dir>/.volume-manager`
    pub fn local_dir(&self) -> PathBuf {
        self.temp_dir.path().join(".volume-manager")
    }

    pub fn config_path(&self) -> PathBuf {
        self.local_dir().join("config.toml")
    }

    /// Socket the CLI uses for this environment
    pub fn socket_path(&self) -> PathBuf {
        self.local_dir().join("daemon.sock")
    }

    /// A command configured for this environment
    pub fn command(&self) -> TestCommand {
        TestCommand::new().arg("--config-dir").arg(self.base_dir())
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Daemon running in the test's runtime against in-memory hardware
pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub hardware: Arc<MemoryHardware>,
    pub executor: Arc<RecordingExecutor>,
    pub manager: Arc<ConnectionManager>,
    signals: flume::Sender<HardwareSignal>,
    shutdown: flume::Sender<()>,
    task: JoinHandle<AppResult<()>>,
    _temp_dir: Option<TempDir>,
}

impl TestDaemon {
    /// Start in a fresh temporary directory
    pub async fn start(config: Config, hardware: Arc<MemoryHardware>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let socket_path = temp_dir.path().join("daemon.sock");
        let mut daemon = Self::start_at(config, hardware, socket_path).await;
        daemon._temp_dir = Some(temp_dir);
        daemon
    }

    /// Start listening on `socket_path`; returns once clients can connect
    pub async fn start_at(config: Config, hardware: Arc<MemoryHardware>, socket_path: PathBuf) -> Self {
        let executor = Arc::new(RecordingExecutor::with_hardware(Arc::clone(&hardware)));
        let daemon = VolumeDaemon::new(config, socket_path.clone(), hardware.clone(), executor.clone());
        let manager = Arc::clone(daemon.connection_manager());

        let (signals, signal_receiver) = flume::unbounded();
        let (shutdown, shutdown_receiver) = flume::bounded(1);
        let task = tokio::spawn(daemon.run(signal_receiver, shutdown_receiver));

        let started = Self {
            socket_path,
            hardware,
            executor,
            manager,
            signals,
            shutdown,
            task,
            _temp_dir: None,
        };
        started.wait_until_listening().await;
        started
    }

    async fn wait_until_listening(&self) {
        for _ in 0..200 {
            if VolumeManagerClient::connect(&self.socket_path).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("daemon did not start listening on {}", self.socket_path.display());
    }

    pub async fn client(&self) -> VolumeManagerClient {
        VolumeManagerClient::connect(&self.socket_path)
            .await
            .expect("Failed to connect to test daemon")
    }

    pub fn signal(&self, signal: HardwareSignal) {
        self.signals.send(signal).expect("hardware pump stopped");
    }

    pub async fn stop(self) -> AppResult<()> {
        let _ = self.shutdown.send(());
        self.join().await
    }

    /// Wait for the daemon to exit on its own
    pub async fn join(self) -> AppResult<()> {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("daemon did not stop")
            .expect("daemon task panicked")
    }
}

/// Next notification, failing the test after a second
pub async fn next_notification(client: &VolumeManagerClient) -> Notification {
    tokio::time::timeout(Duration::from_secs(1), client.notifications().recv_async())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification stream closed")
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Configuration that leaves new volumes alone
pub fn manual_config() -> Config {
    let mut config = Config::default();
    config.policy.automount_drives = false;
    config
}
