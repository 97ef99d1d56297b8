//! Server loop errors.

use sub3_shared::{ids::PlayerId, ocean::OceanError};

/// Errors raised by the session.
///
/// `Corruption` and `UnknownPlayer` mean the authoritative state can no longer
/// be trusted and end the loop. `PlayerIdsExhausted` only refuses the
/// connection being admitted.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("ocean corrupted: {0}")]
    Corruption(#[from] OceanError),
    #[error("player {0} is not connected")]
    UnknownPlayer(PlayerId),
    #[error("no player ids left to assign")]
    PlayerIdsExhausted,
}

impl ServerError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, ServerError::Corruption(_))
    }

    /// Whether the loop has to stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ServerError::PlayerIdsExhausted)
    }
}
