//! Interruption: deciding when the user barges in, and the ordered hard stop.

use crate::audio::playback::{PlaybackGate, PlaybackSession, StopReport};
use crate::config::BargeInConfig;
use crate::pipeline::cache::PipelineCache;
use crate::pipeline::messages::{ActivityEvent, InterruptReason};
use crate::turn::activity::ActivityTracker;
use crate::turn::cascade::CascadeScheduler;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// What an activity event means while the assistant may be speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No playback is active; the event is ordinary user activity.
    NotSpeaking,
    /// Confident user speech over playback: hard stop.
    Interrupt,
    /// Playback is active but the event does not qualify. Treated as
    /// residual echo of the assistant's own voice.
    Echo,
}

/// Mutable state touched by a hard stop, borrowed from the coordinator.
pub struct HardStopTargets<'a> {
    pub gate: &'a mut PlaybackGate,
    pub scheduler: &'a mut CascadeScheduler,
    pub tracker: &'a mut ActivityTracker,
    pub cache: &'a mut PipelineCache,
}

/// Outcome of a hard stop.
#[derive(Debug, Clone, Copy)]
pub struct InterruptOutcome {
    pub reason: InterruptReason,
    pub old_epoch: u64,
    pub new_epoch: u64,
    /// Present when playback was active and had to be silenced.
    pub stop: Option<StopReport>,
}

/// Barge-in detection and the ordered hard stop.
#[derive(Debug, Clone)]
pub struct InterruptionController {
    config: BargeInConfig,
}

impl InterruptionController {
    pub fn new(config: BargeInConfig) -> Self {
        Self { config }
    }

    /// Classify `evt` against the active playback session, if any.
    pub fn evaluate(
        &self,
        evt: &ActivityEvent,
        session: Option<&PlaybackSession>,
        now: Instant,
    ) -> Verdict {
        let Some(session) = session.filter(|s| s.active) else {
            return Verdict::NotSpeaking;
        };
        if !self.config.enabled || !evt.has_speech() {
            return Verdict::Echo;
        }
        if evt.confidence <= self.config.confidence_threshold {
            return Verdict::Echo;
        }
        let holdoff = Duration::from_millis(self.config.assistant_start_holdoff_ms);
        if now.saturating_duration_since(session.started_at) < holdoff {
            debug!(
                handle = %session.handle,
                "speech within playback-start holdoff, not interrupting"
            );
            return Verdict::Echo;
        }
        Verdict::Interrupt
    }

    /// Atomically discard all in-flight and cached work for the live turn.
    ///
    /// Order is fixed: silence the speaker first so perceived latency does not
    /// depend on the rest, and advance the epoch before anything else can
    /// re-check it.
    pub fn hard_stop(
        &self,
        reason: InterruptReason,
        targets: HardStopTargets<'_>,
    ) -> InterruptOutcome {
        let HardStopTargets {
            gate,
            scheduler,
            tracker,
            cache,
        } = targets;
        let old_epoch = tracker.epoch();

        // 1. Silence.
        let stop = gate.silence();
        // 2. No stage may fire for the old schedule.
        scheduler.cancel_all();
        // 3. Every in-flight result becomes stale.
        let new_epoch = tracker.advance_epoch();
        // 4. Drop cached text and audio.
        cache.clear(new_epoch);
        // 5. Session record closed.
        gate.close_session();
        // 6. The interrupted turn is over.
        tracker.end_turn();

        info!(
            ?reason,
            old_epoch,
            new_epoch,
            stop_ms = ?stop.map(|s| s.elapsed.as_millis()),
            "hard stop"
        );
        InterruptOutcome {
            reason,
            old_epoch,
            new_epoch,
            stop,
        }
    }
}
