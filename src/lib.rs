//! Fae cascade: turn detection and speculative response for voice conversations.
//!
//! Transcription updates drive a three-stage cascade that starts work before
//! the user has provably finished speaking:
//! silence → generate → synthesize → play
//!
//! # Architecture
//!
//! A single actor task ([`PipelineCoordinator`]) owns all per-turn state:
//! - **Activity tracking**: accumulates the utterance and resets the cascade
//!   on every transcription update
//! - **Cascade scheduling**: three silence offsets, rearmed atomically
//! - **Pipeline cache**: speculative text and audio tagged by epoch
//! - **Interruption**: confident user speech over playback triggers an
//!   ordered hard stop
//! - **Playback gate**: at most one voice at a time, stop within budget

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod services;
pub mod sim;
pub mod turn;

pub use config::CascadeConfig;
pub use error::{CascadeError, Result};
pub use pipeline::coordinator::{
    CoordinatorHandle, CoordinatorSnapshot, PipelineCoordinator, drive_transcription,
};
pub use pipeline::messages::{ActivityEvent, AudioBuffer, InterruptReason};
pub use runtime::RuntimeEvent;
pub use turn::TurnState;
