//! Modules used by both the CLI and the daemon

pub mod ipc;
pub mod templates;

pub use ipc::{DaemonStatus, Notification, VolumeManagerClient};
pub use templates::NotificationFormatter;
