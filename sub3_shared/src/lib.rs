//! `sub3_shared`
//!
//! Libraries used by both the Sub3 server and its clients.
//!
//! Design goals:
//! - One authoritative `Ocean`, changed only by executing `Message`s.
//! - Closed enums for vessel kinds and messages so every match is checked.
//! - Traits at the seams the server loop consumes (`ClientChannel`,
//!   `PhysicsBackend`) for substitution in tests.
//! - No `unsafe`.

pub mod config;
pub mod ids;
pub mod message;
pub mod net;
pub mod ocean;
pub mod physics;
pub mod vessel;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ids::*;
    pub use crate::message::*;
    pub use crate::ocean::*;
    pub use crate::vessel::*;
}
