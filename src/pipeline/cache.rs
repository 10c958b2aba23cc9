//! Per-turn cache of speculative results.
//!
//! Everything stored here is tagged with the epoch and stage token it was
//! computed under. Writers must present both; a mismatch means the result
//! is stale and the write is refused.

use crate::pipeline::messages::AudioBuffer;
use crate::turn::cascade::StageToken;
use serde::Serialize;

/// Speculative generation/synthesis results for the live turn.
#[derive(Debug, Default)]
pub struct PipelineCache {
    generated_text: Option<String>,
    generation_in_flight: bool,
    synthesized_audio: Option<AudioBuffer>,
    synthesis_in_flight: bool,
    epoch: u64,
    token: Option<StageToken>,
    /// Stage 2 fired before generation finished.
    synthesis_waiting: bool,
    /// Stage 3 fired before synthesis finished.
    playback_waiting: bool,
}

/// Read-only view of the cache flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    pub epoch: u64,
    pub has_generated_text: bool,
    pub generation_in_flight: bool,
    pub has_synthesized_audio: bool,
    pub synthesis_in_flight: bool,
}

impl CacheSnapshot {
    /// True when nothing is cached and nothing is in flight.
    pub fn is_empty(&self) -> bool {
        !self.has_generated_text
            && !self.generation_in_flight
            && !self.has_synthesized_audio
            && !self.synthesis_in_flight
    }
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether results for `(epoch, token)` may be read or written.
    pub fn accepts(&self, epoch: u64, token: StageToken) -> bool {
        self.epoch == epoch && self.token == Some(token)
    }

    /// Empty every slot and tag the cache with `epoch`.
    pub fn clear(&mut self, epoch: u64) {
        *self = Self {
            epoch,
            ..Self::default()
        };
    }

    /// Attach the cache to a freshly armed schedule.
    ///
    /// Any work belonging to an earlier schedule is dropped: the transcript it
    /// was computed from has since changed.
    pub fn bind(&mut self, epoch: u64, token: StageToken) -> bool {
        if self.accepts(epoch, token) {
            return false;
        }
        let had_work = !self.snapshot().is_empty();
        self.clear(epoch);
        self.token = Some(token);
        had_work
    }

    pub fn generated_text(&self) -> Option<&str> {
        self.generated_text.as_deref()
    }

    pub fn synthesized_audio(&self) -> Option<&AudioBuffer> {
        self.synthesized_audio.as_ref()
    }

    pub fn generation_in_flight(&self) -> bool {
        self.generation_in_flight
    }

    pub fn synthesis_in_flight(&self) -> bool {
        self.synthesis_in_flight
    }

    /// Claim the generation slot. Returns false if generation already ran or
    /// is running for this schedule, or the cache belongs to another one.
    pub fn try_begin_generation(&mut self, epoch: u64, token: StageToken) -> bool {
        if !self.accepts(epoch, token)
            || self.generation_in_flight
            || self.generated_text.is_some()
        {
            return false;
        }
        self.generation_in_flight = true;
        true
    }

    /// Store generated text. Refused (returns false) when stale.
    pub fn store_generation(&mut self, epoch: u64, token: StageToken, text: String) -> bool {
        if !self.accepts(epoch, token) {
            return false;
        }
        self.generated_text = Some(text);
        self.generation_in_flight = false;
        true
    }

    /// Claim the synthesis slot; requires generated text.
    pub fn try_begin_synthesis(&mut self, epoch: u64, token: StageToken) -> Option<String> {
        if !self.accepts(epoch, token)
            || self.synthesis_in_flight
            || self.synthesized_audio.is_some()
        {
            return None;
        }
        let text = self.generated_text.clone()?;
        self.synthesis_in_flight = true;
        self.synthesis_waiting = false;
        Some(text)
    }

    /// Store synthesized audio. Refused (returns false) when stale.
    pub fn store_synthesis(&mut self, epoch: u64, token: StageToken, audio: AudioBuffer) -> bool {
        if !self.accepts(epoch, token) {
            return false;
        }
        self.synthesized_audio = Some(audio);
        self.synthesis_in_flight = false;
        true
    }

    /// Give up on synthesis for this schedule without a result.
    pub fn abandon_synthesis(&mut self, epoch: u64, token: StageToken) -> bool {
        if !self.accepts(epoch, token) {
            return false;
        }
        self.synthesis_in_flight = false;
        self.playback_waiting = false;
        true
    }

    /// Register the stage-2 continuation: synthesize once generation lands.
    pub fn wait_for_generation(&mut self) {
        self.synthesis_waiting = true;
    }

    /// Register the stage-3 continuation: play once synthesis lands.
    pub fn wait_for_synthesis(&mut self) {
        self.playback_waiting = true;
    }

    pub fn synthesis_waiting(&self) -> bool {
        self.synthesis_waiting
    }

    /// Take the stage-3 continuation, if registered.
    pub fn take_playback_waiting(&mut self) -> bool {
        std::mem::take(&mut self.playback_waiting)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            epoch: self.epoch,
            has_generated_text: self.generated_text.is_some(),
            generation_in_flight: self.generation_in_flight,
            has_synthesized_audio: self.synthesized_audio.is_some(),
            synthesis_in_flight: self.synthesis_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::CascadeTimingConfig;
    use crate::turn::cascade::CascadeScheduler;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Two distinct live tokens from a real scheduler.
    async fn tokens() -> (StageToken, StageToken) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sched = CascadeScheduler::new(CascadeTimingConfig::default(), tx);
        let a = sched.rearm(Instant::now(), 1, Duration::ZERO).token;
        let b = sched.rearm(Instant::now(), 1, Duration::ZERO).token;
        (a, b)
    }

    fn audio() -> AudioBuffer {
        AudioBuffer::new(vec![0.1; 160], 16_000)
    }

    #[tokio::test(start_paused = true)]
    async fn generation_slot_is_claimed_once() {
        let (tok, _) = tokens().await;
        let mut cache = PipelineCache::new();
        cache.bind(1, tok);

        assert!(cache.try_begin_generation(1, tok));
        assert!(!cache.try_begin_generation(1, tok));
        assert!(cache.store_generation(1, tok, "hi".into()));
        assert!(!cache.try_begin_generation(1, tok));
        assert_eq!(cache.generated_text(), Some("hi"));
        assert!(!cache.generation_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_or_token_is_refused() {
        let (old, new) = tokens().await;
        let mut cache = PipelineCache::new();
        cache.bind(1, old);
        assert!(cache.try_begin_generation(1, old));

        cache.bind(1, new);
        assert!(!cache.store_generation(1, old, "late".into()));
        assert!(cache.generated_text().is_none());
        assert!(!cache.generation_in_flight());

        cache.clear(2);
        assert!(!cache.store_synthesis(1, new, audio()));
        assert!(cache.synthesized_audio().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_requires_generated_text() {
        let (tok, _) = tokens().await;
        let mut cache = PipelineCache::new();
        cache.bind(3, tok);

        assert!(cache.try_begin_synthesis(3, tok).is_none());
        cache.wait_for_generation();
        assert!(cache.synthesis_waiting());

        cache.try_begin_generation(3, tok);
        cache.store_generation(3, tok, "reply".into());
        assert_eq!(cache.try_begin_synthesis(3, tok).as_deref(), Some("reply"));
        assert!(!cache.synthesis_waiting());
        assert!(cache.try_begin_synthesis(3, tok).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_empties_every_slot() {
        let (tok, _) = tokens().await;
        let mut cache = PipelineCache::new();
        cache.bind(1, tok);
        cache.try_begin_generation(1, tok);
        cache.store_generation(1, tok, "x".into());
        cache.try_begin_synthesis(1, tok);
        cache.store_synthesis(1, tok, audio());
        cache.wait_for_synthesis();

        cache.clear(2);
        let snap = cache.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.epoch, 2);
        assert!(!cache.take_playback_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_reports_discarded_work() {
        let (a, b) = tokens().await;
        let mut cache = PipelineCache::new();
        assert!(!cache.bind(1, a));
        assert!(!cache.bind(1, a));
        cache.try_begin_generation(1, a);
        assert!(cache.bind(1, b));
    }
}
