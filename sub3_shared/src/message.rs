//! Replicated messages.
//!
//! Every change to the authoritative ocean is a `Message`. The server executes
//! a message locally and then replicates it to the players that
//! `should_send_to` selects; clients execute the same message against their
//! own mirror.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{PlayerId, VesselId},
    ocean::{Month, Ocean, OceanError},
    vessel::{Vessel, VesselKind, VesselState},
};

/// One replicated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Brings a vessel into the ocean.
    Spawn {
        kind: VesselKind,
        id: VesselId,
        state: VesselState,
    },
    /// Removes a vessel from the ocean.
    Despawn { id: VesselId },
    /// Replaces a vessel's state wholesale.
    UpdateState { id: VesselId, state: VesselState },
    /// Tells a freshly connected client who it is.
    SetPlayerId { player: PlayerId },
    /// Tells a client which vessel it may control.
    SetCurrentVessel { id: VesselId },
    /// Changes the in-world month.
    SetMonth { month: Month },
}

impl Message {
    /// Applies this message to `ocean`.
    ///
    /// Spawning a present vessel, or despawning/updating an absent one, is a
    /// corruption error. Executing the same spawn or despawn twice therefore
    /// fails; callers must execute each generated message once.
    pub fn execute(&self, ocean: &mut Ocean) -> Result<(), OceanError> {
        match self {
            Message::Spawn { kind, id, state } => ocean.spawn(*id, Vessel::new(*kind, *state)),
            Message::Despawn { id } => ocean.despawn(*id),
            Message::UpdateState { id, state } => ocean.update_state(*id, *state),
            Message::SetMonth { month } => {
                ocean.set_month(*month);
                Ok(())
            }
            // Session identity lives on the client, not in the ocean.
            Message::SetPlayerId { .. } | Message::SetCurrentVessel { .. } => Ok(()),
        }
    }

    /// Whether the server replicates this message to `player`.
    pub fn should_send_to(&self, player: PlayerId) -> bool {
        match self {
            Message::SetPlayerId { player: target } => *target == player,
            Message::SetCurrentVessel { id } => id.owner == player,
            Message::Spawn { .. }
            | Message::Despawn { .. }
            | Message::UpdateState { .. }
            | Message::SetMonth { .. } => true,
        }
    }

    /// Whether the server relays this message when a client sends it.
    ///
    /// Spawns, despawns and month changes alter what exists in the ocean and
    /// have to reach every mirror. State updates are not relayed: the next
    /// world tick replicates the vessel's state anyway.
    pub fn relayed_from_clients(&self) -> bool {
        match self {
            Message::Spawn { .. } | Message::Despawn { .. } | Message::SetMonth { .. } => true,
            Message::UpdateState { .. }
            | Message::SetPlayerId { .. }
            | Message::SetCurrentVessel { .. } => false,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Spawn { .. } => "spawn",
            Message::Despawn { .. } => "despawn",
            Message::UpdateState { .. } => "update_state",
            Message::SetPlayerId { .. } => "set_player_id",
            Message::SetCurrentVessel { .. } => "set_current_vessel",
            Message::SetMonth { .. } => "set_month",
        }
    }
}
