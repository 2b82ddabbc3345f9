use std::fmt;
use uuid::Uuid;

use crate::error::LinkError;

/// A peripheral seen during discovery. Only valid for the discovery cycle that produced it.
#[derive(Debug, Clone, Eq)]
pub struct PeripheralHandle {
    pub address: String,
    pub name: String,
}

impl PeripheralHandle {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        PeripheralHandle { address: address.into(), name: name.into() }
    }

    /// Matches either the address (case insensitive) or the exact advertised name.
    pub fn matches(&self, target: &str) -> bool {
        self.address.eq_ignore_ascii_case(target) || (!self.name.is_empty() && self.name == target)
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.address, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    ServicesDiscovered,
    Streaming,
    Failed(String),
}

impl ConnectionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed(_))
    }
}

/// Token identifying one connect-to-disconnect cycle. Issued in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub uuid: Uuid,
    pub notify: bool,
}

#[derive(Debug)]
pub enum LinkEvent {
    Notification { uuid: Uuid, value: Vec<u8> },
    // `cause` is None for a clean remote close
    Lost { cause: Option<LinkError> },
}
