//! Runtime events emitted by the coordinator for UI and observability.
//!
//! Payloads stay small so the coordinator can emit without slowing the
//! interrupt path. Sends are best-effort: a lagging or absent subscriber
//! never blocks the coordinator.

use crate::pipeline::messages::InterruptReason;
use crate::turn::TurnState;
use crate::turn::cascade::Stage;
use serde::Serialize;

/// Events that describe what the coordinator is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// The whole-system state machine changed state.
    StateChanged { from: TurnState, to: TurnState },
    /// A new conversation turn began accumulating user speech.
    TurnStarted { epoch: u64 },
    /// A cascade stage fired with a live token.
    StageFired { stage: Stage, epoch: u64 },
    /// The generation service was called.
    GenerationStarted { epoch: u64, context: String },
    /// Generated text was stored in the cache.
    GenerationReady {
        epoch: u64,
        text: String,
        fallback: bool,
    },
    /// The synthesis service was called.
    SynthesisStarted { epoch: u64, text: String },
    /// Synthesized audio was stored in the cache.
    SynthesisReady {
        epoch: u64,
        duration_ms: u64,
        fallback: bool,
    },
    /// Playback of the turn's response started.
    PlaybackStarted { epoch: u64, session: u64 },
    /// Playback was silenced by an interruption.
    PlaybackStopped {
        epoch: u64,
        session: u64,
        elapsed_ms: u64,
    },
    /// The playback backend reported an error; the turn was abandoned.
    PlaybackFailed { epoch: u64, error: String },
    /// The user interrupted; all in-flight work was invalidated.
    Interrupted {
        reason: InterruptReason,
        old_epoch: u64,
        new_epoch: u64,
    },
    /// The response finished playing without interruption.
    TurnCompleted { epoch: u64 },
    /// An async result arrived for a superseded turn or schedule.
    StaleResultDiscarded {
        stage: Stage,
        result_epoch: u64,
        live_epoch: u64,
    },
    /// The speech recognizer should start a fresh session.
    RecognitionReset,
}
