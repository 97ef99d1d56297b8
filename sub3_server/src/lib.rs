//! `sub3_server`
//!
//! Authoritative server:
//! - Fixed-interval frame loop on its own task
//! - Owns the `Ocean` and the client registry
//! - Executes inbound client messages
//! - Replicates every world change as `Message`s
//! - Despawns vessels the physics backend reports as colliding
//!
//! Networking model:
//! - TCP, one length-prefixed JSON frame per message

pub mod error;
pub mod server;
pub mod session;

pub use error::ServerError;
pub use server::{ServerState, SubServer};
pub use session::{ServerStatus, Session};
