//! Physics abstraction.
//!
//! Vessel motion is produced by `Ocean::tick`; a physics backend only looks at
//! the resulting positions and reports which vessels touch.

use crate::{ids::VesselId, ocean::Ocean};

/// Two vessels found in contact during one step.
pub type Collision = (VesselId, VesselId);

/// Physics stepper trait.
pub trait PhysicsBackend: Send {
    /// Advances by `dt_sec` and returns every colliding pair.
    fn step(&mut self, ocean: &Ocean, dt_sec: f64) -> Vec<Collision>;
}

/// No-op physics.
#[derive(Default)]
pub struct NullPhysics;

impl PhysicsBackend for NullPhysics {
    fn step(&mut self, _ocean: &Ocean, _dt_sec: f64) -> Vec<Collision> {
        Vec::new()
    }
}

/// Treats every vessel as a sphere of `radius_m` and reports overlapping
/// pairs in id order.
#[derive(Debug, Clone, Copy)]
pub struct ProximityPhysics {
    pub radius_m: f64,
}

impl ProximityPhysics {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m }
    }
}

impl PhysicsBackend for ProximityPhysics {
    fn step(&mut self, ocean: &Ocean, _dt_sec: f64) -> Vec<Collision> {
        let vessels: Vec<_> = ocean.vessels().map(|(id, v)| (id, v.state())).collect();
        let reach = 2.0 * self.radius_m;
        let mut collisions = Vec::new();
        for (i, (a, a_state)) in vessels.iter().enumerate() {
            for (b, b_state) in &vessels[i + 1..] {
                if a_state.distance_m(b_state) < reach {
                    collisions.push((*a, *b));
                }
            }
        }
        collisions
    }
}
