//! Volume Manager Library
//!
//! A session daemon that follows removable volumes through their
//! attach/mount/unmount/remove life cycle and forwards the changes to
//! clients subscribed over a Unix socket, plus the client side of that
//! protocol.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod events;
pub mod hardware;
pub mod shared;
pub mod volume;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigManager, PolicyConfig};
pub use errors::{AppError, AppResult};
pub use events::{Command, EventMask};
pub use shared::VolumeManagerClient;
pub use volume::{MountedVolume, Volume, VolumeChangeInfo, VolumeManager};
