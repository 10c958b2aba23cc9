//! Message types passed into and out of the coordinator.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A transcription update from the speech stream.
///
/// Immutable once created. Partials carry the live preview of the current
/// segment; finals commit it.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    /// Transcribed text (may be empty for keep-alive partials).
    pub text: String,
    /// Whether the recognizer finalized this segment.
    pub is_final: bool,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f32,
    /// When the transcription was produced.
    pub at: Instant,
}

impl ActivityEvent {
    /// A partial (live preview) transcription stamped now.
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence,
            at: Instant::now(),
        }
    }

    /// A finalized transcription stamped now.
    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
            at: Instant::now(),
        }
    }

    /// Whether the event carries any actual words.
    pub fn has_speech(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Synthesized mono audio, cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// f32 samples in `[-1, 1]`.
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Playback length of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let micros = self.samples.len() as u64 * 1_000_000 / u64::from(self.sample_rate);
        Duration::from_micros(micros)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Generation result. Services echo back the epoch they were called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub epoch: u64,
}

/// Why an out-of-band interrupt was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    /// Confident user speech while the assistant was speaking.
    Speech,
    /// Spoken stop command recognized by the embedding application.
    VoiceCommand,
    /// UI button or API call.
    Manual,
}

/// Out-of-band interrupt request.
#[derive(Debug, Clone, Copy)]
pub struct InterruptCommand {
    pub reason: InterruptReason,
    pub at: Instant,
}

impl InterruptCommand {
    pub fn new(reason: InterruptReason) -> Self {
        Self {
            reason,
            at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn audio_duration_from_sample_count() {
        let audio = AudioBuffer::new(vec![0.0; 24_000], 16_000);
        assert_eq!(audio.duration(), Duration::from_millis(1500));
        assert!(AudioBuffer::new(vec![0.0; 10], 0).duration().is_zero());
    }

    #[test]
    fn whitespace_only_event_has_no_speech() {
        assert!(!ActivityEvent::partial("  ", 0.9).has_speech());
        assert!(ActivityEvent::final_text("yes", 0.9).has_speech());
    }
}
