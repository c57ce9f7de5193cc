//! Volume change events and client commands
//!
//! Both enumerations travel over the wire as `u32`; the numeric values are
//! fixed so that daemon and client builds stay compatible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

use crate::errors::{AppError, AppResult};

/// Set of volume change events, encoded as OR'd flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const VOLUME_MOUNTED: EventMask = EventMask(1 << 0);
    pub const VOLUME_UNMOUNTED: EventMask = EventMask(1 << 1);
    pub const VOLUME_ATTACHED: EventMask = EventMask(1 << 2);
    pub const VOLUME_REMOVED: EventMask = EventMask(1 << 3);
    pub const MEDIA_INSERTED: EventMask = EventMask(1 << 4);
    pub const ALL_EVENTS: EventMask = EventMask(0xffff_ffff);

    /// Single-bit events in wire order
    pub const EVENTS: [EventMask; 5] = [
        Self::VOLUME_MOUNTED,
        Self::VOLUME_UNMOUNTED,
        Self::VOLUME_ATTACHED,
        Self::VOLUME_REMOVED,
        Self::MEDIA_INSERTED,
    ];

    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if the two masks share at least one bit
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: EventMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EventMask) {
        self.0 &= !other.0;
    }

    /// Iterate the known single-bit events contained in this mask
    pub fn iter(self) -> impl Iterator<Item = EventMask> {
        Self::EVENTS.into_iter().filter(move |e| self.contains(*e))
    }

    /// Stable lowercase name for a single-bit event
    pub fn name(self) -> &'static str {
        match self {
            Self::VOLUME_MOUNTED => "mounted",
            Self::VOLUME_UNMOUNTED => "unmounted",
            Self::VOLUME_ATTACHED => "attached",
            Self::VOLUME_REMOVED => "removed",
            Self::MEDIA_INSERTED => "media-inserted",
            Self::NONE => "none",
            Self::ALL_EVENTS => "all",
            _ => "mixed",
        }
    }

    /// Parse a comma separated list such as `mounted,unmounted` or `all`
    pub fn parse_list(list: &str) -> AppResult<Self> {
        let mut mask = EventMask::NONE;
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let event = match name {
                "all" => EventMask::ALL_EVENTS,
                "mounted" => EventMask::VOLUME_MOUNTED,
                "unmounted" => EventMask::VOLUME_UNMOUNTED,
                "attached" => EventMask::VOLUME_ATTACHED,
                "removed" => EventMask::VOLUME_REMOVED,
                "media-inserted" => EventMask::MEDIA_INSERTED,
                other => {
                    return Err(AppError::InvalidArgument {
                        argument: other.to_string(),
                        reason: "expected one of all, mounted, unmounted, attached, removed, media-inserted"
                            .to_string(),
                    })
                }
            };
            mask.insert(event);
        }
        Ok(mask)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl Sub for EventMask {
    type Output = EventMask;

    fn sub(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & !rhs.0)
    }
}

impl Not for EventMask {
    type Output = EventMask;

    fn not(self) -> EventMask {
        EventMask(!self.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands a client can ask the daemon to run against a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Noop,
    Mount,
    Unmount,
    Eject,
    Play,
}

impl Command {
    pub const fn wire_value(self) -> u32 {
        match self {
            Command::Noop => 0,
            Command::Mount => 1,
            Command::Unmount => 2,
            Command::Eject => 3,
            Command::Play => 4,
        }
    }

    /// Map a notification action key to a command; unknown keys are no-ops
    pub fn from_action_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "mount" | "open" => Command::Mount,
            "unmount" => Command::Unmount,
            "eject" => Command::Eject,
            "play" => Command::Play,
            _ => Command::Noop,
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = AppError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Noop),
            1 => Ok(Command::Mount),
            2 => Ok(Command::Unmount),
            3 => Ok(Command::Eject),
            4 => Ok(Command::Play),
            other => Err(AppError::UnknownWireValue {
                kind: "command",
                value: other,
            }),
        }
    }
}

impl From<Command> for u32 {
    fn from(command: Command) -> u32 {
        command.wire_value()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Noop => "noop",
            Command::Mount => "mount",
            Command::Unmount => "unmount",
            Command::Eject => "eject",
            Command::Play => "play",
        };
        f.write_str(name)
    }
}

/// `data` argument of `executeCommand`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandData {
    pub device: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl CommandData {
    pub fn for_device(device: impl Into<String>) -> Self {
        CommandData {
            device: device.into(),
            payload: Vec::new(),
        }
    }
}

/// A user's answer to an action surfaced for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    pub device: String,
    pub action_key: String,
}

/// Encode an opaque `data` payload
pub fn encode_payload<T: Serialize>(value: &T) -> AppResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

/// Decode an opaque `data` payload
pub fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> AppResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}
