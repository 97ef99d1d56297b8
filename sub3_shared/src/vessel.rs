//! Vessel model.
//!
//! Kept small and deterministic: a vessel is a kind tag plus a plain state
//! value. Motion is dead reckoning on a locally flat earth, which is accurate
//! enough for the distances a vessel covers in one tick.

use serde::{Deserialize, Serialize};

use crate::{ids::VesselId, message::Message};

/// Metres spanned by one degree of latitude.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Position and motion of one vessel.
///
/// Replaced wholesale on update; there is no partial-field write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VesselState {
    /// Degrees, positive north.
    pub latitude: f64,
    /// Degrees, positive east.
    pub longitude: f64,
    /// Metres relative to the surface; negative is submerged.
    pub altitude: f64,
    /// Radians clockwise from north.
    pub heading: f64,
    /// Metres per second along `heading`.
    pub speed: f64,
    /// Metres per second, positive rises.
    pub depth_rate: f64,
}

impl Default for VesselState {
    fn default() -> Self {
        Self::at(0.0, 0.0, -100.0)
    }
}

impl VesselState {
    /// A motionless vessel at the given position.
    pub const fn at(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            heading: 0.0,
            speed: 0.0,
            depth_rate: 0.0,
        }
    }

    /// Returns this state with new motion values and the same position.
    pub fn with_motion(self, heading: f64, speed: f64, depth_rate: f64) -> Self {
        Self {
            heading,
            speed,
            depth_rate,
            ..self
        }
    }

    /// Advances the position by `dt_sec` of straight-line travel.
    pub fn advanced(self, dt_sec: f64) -> Self {
        let north = self.speed * self.heading.cos() * dt_sec;
        let east = self.speed * self.heading.sin() * dt_sec;

        let latitude = (self.latitude + north / METRES_PER_DEGREE).clamp(-90.0, 90.0);
        let lon_scale = (METRES_PER_DEGREE * self.latitude.to_radians().cos()).max(1.0);
        let longitude = wrap_longitude(self.longitude + east / lon_scale);
        // Vessels cannot climb out of the water.
        let altitude = (self.altitude + self.depth_rate * dt_sec).min(0.0);

        Self {
            latitude,
            longitude,
            altitude,
            ..self
        }
    }

    /// Approximate straight-line distance in metres to another state.
    pub fn distance_m(&self, other: &Self) -> f64 {
        let mean_lat = ((self.latitude + other.latitude) / 2.0).to_radians();
        let north = (other.latitude - self.latitude) * METRES_PER_DEGREE;
        let east = wrap_longitude(other.longitude - self.longitude)
            * METRES_PER_DEGREE
            * mean_lat.cos();
        let up = other.altitude - self.altitude;
        (north * north + east * east + up * up).sqrt()
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Closed set of simulated vessel variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VesselKind {
    /// Player-controlled submarine that moves along its heading.
    BasicSubmarine,
    /// Inert placeholder that never moves.
    Dummy,
}

/// A live vessel owned by the ocean.
#[derive(Debug, Clone, PartialEq)]
pub struct Vessel {
    kind: VesselKind,
    state: VesselState,
}

impl Vessel {
    pub fn new(kind: VesselKind, state: VesselState) -> Self {
        Self { kind, state }
    }

    pub fn kind(&self) -> VesselKind {
        self.kind
    }

    pub fn state(&self) -> VesselState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: VesselState) {
        self.state = state;
    }

    /// Computes the state this vessel reaches after `dt_sec`.
    pub fn next_state(&self, dt_sec: f64) -> VesselState {
        match self.kind {
            VesselKind::BasicSubmarine => self.state.advanced(dt_sec),
            VesselKind::Dummy => self.state,
        }
    }

    /// Messages that rebuild this vessel on an empty ocean.
    pub fn spawn_messages(&self, id: VesselId) -> Vec<Message> {
        match self.kind {
            VesselKind::BasicSubmarine | VesselKind::Dummy => vec![Message::Spawn {
                kind: self.kind,
                id,
                state: self.state,
            }],
        }
    }
}
