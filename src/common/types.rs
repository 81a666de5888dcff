//! Identifier and capability types shared across the coordinator

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Identifier of a cluster member.
///
/// A ServerId is the slot the member occupies in the server list plus the
/// generation of that slot. Generations advance every time a slot is reused,
/// so a stale reference to a departed server never resolves to its
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId {
    index: u32,
    generation: u32,
}

impl ServerId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot in the server list.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time this id was assigned.
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into the wire representation.
    pub fn as_u64(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack from the wire representation.
    pub fn from_u64(raw: u64) -> Self {
        Self {
            index: (raw & 0xffff_ffff) as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

bitflags! {
    /// Service capabilities a server advertises on enlistment.
    /// Serde impls come with the `serde` feature of bitflags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ServiceMask: u32 {
        const MASTER = 1 << 0;
        const BACKUP = 1 << 1;
        const MEMBERSHIP = 1 << 2;
        const PING = 1 << 3;
    }
}

impl ServiceMask {
    /// Wire encoding of the mask.
    pub fn serialize(self) -> u32 {
        self.bits()
    }
}

impl std::fmt::Display for ServiceMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Enlisted and believed to be serving.
    Up,
    /// Departed; recovery of its tablets may be in flight.
    Crashed,
    /// Gone for good. The slot is vacant and may be reused.
    Down,
}

impl ServerStatus {
    pub fn as_u32(self) -> u32 {
        match self {
            ServerStatus::Up => 0,
            ServerStatus::Crashed => 1,
            ServerStatus::Down => 2,
        }
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ServerStatus::Up),
            1 => Some(ServerStatus::Crashed),
            2 => Some(ServerStatus::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Up => write!(f, "up"),
            ServerStatus::Crashed => write!(f, "crashed"),
            ServerStatus::Down => write!(f, "down"),
        }
    }
}
