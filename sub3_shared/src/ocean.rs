//! The authoritative world store.
//!
//! An `Ocean` maps vessel ids to live vessels and carries world metadata. It
//! is an ordinary owned value: the server session holds one, every client
//! holds its own mirror, and tests build as many as they like.
//!
//! Entity mutators are crate-private. Code outside this crate changes an
//! ocean by executing `Message`s, so the server can never mutate state it
//! has not also replicated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ids::VesselId,
    message::Message,
    vessel::{Vessel, VesselState},
};

/// Store invariant violations. Any of these means the authoritative state
/// and the replicated history have diverged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OceanError {
    #[error("ocean already contains vessel {0}")]
    AlreadySpawned(VesselId),
    #[error("ocean does not contain vessel {0}")]
    MissingVessel(VesselId),
}

/// In-world month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Month {
    #[default]
    Undefined,
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

/// Authoritative mapping from vessel id to vessel.
#[derive(Debug, Default)]
pub struct Ocean {
    vessels: BTreeMap<VesselId, Vessel>,
    month: Month,
}

impl Ocean {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(&mut self, id: VesselId, vessel: Vessel) -> Result<(), OceanError> {
        if self.vessels.contains_key(&id) {
            return Err(OceanError::AlreadySpawned(id));
        }
        debug!(vessel = %id, kind = ?vessel.kind(), "ocean: spawn");
        self.vessels.insert(id, vessel);
        Ok(())
    }

    pub(crate) fn despawn(&mut self, id: VesselId) -> Result<(), OceanError> {
        debug!(vessel = %id, "ocean: despawn");
        self.vessels
            .remove(&id)
            .map(|_| ())
            .ok_or(OceanError::MissingVessel(id))
    }

    pub(crate) fn update_state(
        &mut self,
        id: VesselId,
        state: VesselState,
    ) -> Result<(), OceanError> {
        let vessel = self
            .vessels
            .get_mut(&id)
            .ok_or(OceanError::MissingVessel(id))?;
        vessel.set_state(state);
        Ok(())
    }

    pub(crate) fn set_month(&mut self, month: Month) {
        self.month = month;
    }

    pub fn month(&self) -> Month {
        self.month
    }

    pub fn has_vessel(&self, id: VesselId) -> bool {
        self.vessels.contains_key(&id)
    }

    /// Current state of a live vessel.
    pub fn state(&self, id: VesselId) -> Result<VesselState, OceanError> {
        self.vessels
            .get(&id)
            .map(Vessel::state)
            .ok_or(OceanError::MissingVessel(id))
    }

    pub fn vessel(&self, id: VesselId) -> Option<&Vessel> {
        self.vessels.get(&id)
    }

    /// Live vessels in id order.
    pub fn vessels(&self) -> impl Iterator<Item = (VesselId, &Vessel)> {
        self.vessels.iter().map(|(id, v)| (*id, v))
    }

    pub fn vessel_ids(&self) -> Vec<VesselId> {
        self.vessels.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vessels.is_empty()
    }

    /// Messages that rebuild this ocean on an empty one, without replaying
    /// history. Vessels come in id order, followed by world metadata.
    pub fn initiation_messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .vessels
            .iter()
            .flat_map(|(id, vessel)| vessel.spawn_messages(*id))
            .collect();
        if self.month != Month::Undefined {
            messages.push(Message::SetMonth { month: self.month });
        }
        messages
    }

    /// Computes one simulation step of `dt_sec`.
    ///
    /// Nothing is applied here: the returned batch holds one `UpdateState`
    /// per live vessel and the caller executes it.
    pub fn tick(&self, dt_sec: f64) -> Vec<Message> {
        self.vessels
            .iter()
            .map(|(id, vessel)| Message::UpdateState {
                id: *id,
                state: vessel.next_state(dt_sec),
            })
            .collect()
    }

    /// Drops every vessel and resets metadata.
    pub fn reset_all(&mut self) {
        debug!(vessels = self.vessels.len(), "ocean: reset");
        self.vessels.clear();
        self.month = Month::Undefined;
    }
}
