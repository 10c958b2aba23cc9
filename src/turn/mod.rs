//! Turn detection: activity tracking, the stage cascade, and interruption.

pub mod activity;
pub mod cascade;
pub mod interrupt;

use serde::Serialize;

/// Whole-system conversation state.
///
/// ```text
/// Listening --(activity)--> Accumulating --(playback starts)--> Speaking
/// Accumulating --(interrupt)--> Listening (new turn)
/// Speaking --(interrupt)--> Listening (new turn)
/// Speaking --(playback completion)--> Listening
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Idle, waiting for the user to speak.
    #[default]
    Listening,
    /// User speech is accumulating; speculative stages may be running.
    Accumulating,
    /// The response is playing.
    Speaking,
}
