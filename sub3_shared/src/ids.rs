//! Player and vessel identities.
//!
//! Both ids are plain values. `VesselId` orders by owner first, then by the
//! owner's sequence number, which gives the ocean a stable iteration order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a connected player. Assigned by the server starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// First id handed out by a freshly started server.
    pub const FIRST: Self = PlayerId(1);

    /// Returns the id that follows this one, or `None` once the id space is
    /// used up. Ids are never reused, so a server run can admit at most
    /// `u32::MAX` players.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(PlayerId)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one vessel: the owning player plus a per-owner sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VesselId {
    pub owner: PlayerId,
    pub seq: u32,
}

impl VesselId {
    pub const fn new(owner: PlayerId, seq: u32) -> Self {
        Self { owner, seq }
    }

    /// The vessel every player receives on joining.
    pub const fn first_of(owner: PlayerId) -> Self {
        Self::new(owner, 0)
    }
}

impl fmt::Display for VesselId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.owner, self.seq)
    }
}
