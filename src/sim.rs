//! Simulated services with scripted latency and failures.
//!
//! Used by the `fae-cascade-sim` harness and the test suites. All timing
//! goes through `tokio::time`, so a paused test clock drives them exactly.

use crate::audio::playback::{PlaybackBackend, PlaybackEnd};
use crate::error::{CascadeError, Result};
use crate::pipeline::messages::{AudioBuffer, GeneratedText};
use crate::services::{GenerationService, SynthesisService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sample rate of simulated speech.
pub const SIM_SAMPLE_RATE: u32 = 16_000;

/// Spoken length of one simulated word.
pub const SIM_MS_PER_WORD: u64 = 300;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded service invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub input: String,
    pub epoch: u64,
    pub at: Instant,
}

/// How a scripted failure manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Return an error after the configured latency.
    Error,
    /// Never answer; the caller's timeout has to fire.
    Hang,
}

/// Latency, failure and call-log plumbing shared by the scripted services.
#[derive(Debug)]
struct Script {
    latency: Duration,
    failures: AtomicU32,
    failure_mode: FailureMode,
    fail_on: Mutex<Vec<String>>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl Script {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            failures: AtomicU32::new(0),
            failure_mode: FailureMode::Error,
            fail_on: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Record the call and wait out its latency. `Err` means "fail this call".
    async fn run(&self, input: &str, epoch: u64) -> std::result::Result<(), FailureMode> {
        lock(&self.calls).push(ServiceCall {
            input: input.to_owned(),
            epoch,
            at: Instant::now(),
        });
                let scripted_failure = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let input_failure = lock(&self.fail_on).iter().any(|s| s == input);
        let fail = scripted_failure || input_failure;

        if fail && self.failure_mode == FailureMode::Hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;
        if fail { Err(self.failure_mode) } else { Ok(()) }
    }

    fn calls(&self) -> Vec<ServiceCall> {
        lock(&self.calls).clone()
    }
}

/// Language-model stand-in that answers after a fixed latency.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: Script,
    /// Added to the echoed epoch; non-zero simulates a misbehaving service.
    epoch_skew: u64,
}

impl ScriptedGenerator {
    pub fn new(latency: Duration) -> Self {
        Self {
            script: Script::new(latency),
            epoch_skew: 0,
        }
    }

    /// Fail the next `n` calls.
    pub fn with_failures(mut self, n: u32, mode: FailureMode) -> Self {
        self.script.failures = AtomicU32::new(n);
        self.script.failure_mode = mode;
        self
    }

    /// Echo back a different epoch than requested.
    pub fn with_epoch_skew(mut self, skew: u64) -> Self {
        self.epoch_skew = skew;
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.script.calls()
    }

    /// Deterministic reply for `context`.
    pub fn reply_for(context: &str) -> String {
        format!("You said: {}", context.trim())
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, context: &str, epoch: u64) -> Result<GeneratedText> {
        match self.script.run(context, epoch).await {
            Ok(()) => Ok(GeneratedText {
                text: Self::reply_for(context),
                epoch: epoch + self.epoch_skew,
            }),
            Err(_) => Err(CascadeError::Generation("simulated model failure".into())),
        }
    }
}

/// Text-to-speech stand-in producing silent audio sized by word count.
#[derive(Debug)]
pub struct ScriptedSynthesizer {
    script: Script,
}

impl ScriptedSynthesizer {
    pub fn new(latency: Duration) -> Self {
        Self {
            script: Script::new(latency),
        }
    }

    /// Fail the next `n` calls.
    pub fn with_failures(mut self, n: u32, mode: FailureMode) -> Self {
        self.script.failures = AtomicU32::new(n);
        self.script.failure_mode = mode;
        self
    }

    /// Always fail when asked to speak exactly `text`.
    pub fn failing_on(self, text: impl Into<String>) -> Self {
        lock(&self.script.fail_on).push(text.into());
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.script.calls()
    }

    /// Audio this synthesizer renders for `text`.
    pub fn render(&self, text: &str) -> AudioBuffer {
        let words = text.split_whitespace().count().max(1) as u64;
        let samples = words * SIM_MS_PER_WORD * u64::from(SIM_SAMPLE_RATE) / 1000;
        AudioBuffer::new(vec![0.0; samples as usize], SIM_SAMPLE_RATE)
    }
}

#[async_trait]
impl SynthesisService for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, epoch: u64) -> Result<AudioBuffer> {
        match self.script.run(text, epoch).await {
            Ok(()) => Ok(self.render(text)),
            Err(_) => Err(CascadeError::Synthesis("simulated voice failure".into())),
        }
    }
}

/// One simulated playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRecord {
    pub started_at: Instant,
    pub duration: Duration,
    /// When audio went silent (finished or stopped).
    pub ended_at: Option<Instant>,
    pub end: Option<PlaybackEnd>,
}

#[derive(Debug, Default)]
struct SpeakerState {
    current: Option<CancellationToken>,
    records: Vec<PlaybackRecord>,
    stops: u32,
}

/// Speaker stand-in. "Plays" by sleeping for the buffer's duration.
#[derive(Debug, Default)]
pub struct SimulatedPlayback {
    state: Mutex<SpeakerState>,
    fail_next: AtomicBool,
}

impl SimulatedPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `play` fail as if the device disappeared.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).current.is_some()
    }

    pub fn stop_count(&self) -> u32 {
        lock(&self.state).stops
    }

    pub fn records(&self) -> Vec<PlaybackRecord> {
        lock(&self.state).records.clone()
    }

    fn close_current(state: &mut SpeakerState, end: PlaybackEnd) {
        state.current = None;
        if let Some(rec) = state.records.last_mut().filter(|r| r.ended_at.is_none()) {
            rec.ended_at = Some(Instant::now());
            rec.end = Some(end);
        }
    }
}

#[async_trait]
impl PlaybackBackend for SimulatedPlayback {
    async fn play(&self, audio: AudioBuffer) -> Result<PlaybackEnd> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CascadeError::Playback("simulated device lost".into()));
        }
        let token = CancellationToken::new();
        let duration = audio.duration();
        {
            let mut state = lock(&self.state);
            state.current = Some(token.clone());
            state.records.push(PlaybackRecord {
                started_at: Instant::now(),
                duration,
                ended_at: None,
                end: None,
            });
        }

        tokio::select! {
            () = token.cancelled() => Ok(PlaybackEnd::Stopped),
            () = tokio::time::sleep(duration) => {
                Self::close_current(&mut lock(&self.state), PlaybackEnd::Finished);
                Ok(PlaybackEnd::Finished)
            }
        }
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        state.stops += 1;
        if let Some(token) = state.current.take() {
            token.cancel();
            Self::close_current(&mut state, PlaybackEnd::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn generator_echoes_epoch_after_latency() {
        let generator = ScriptedGenerator::new(Duration::from_millis(300));
        let start = Instant::now();
        let out = generator.generate("hello", 9).await.unwrap();

        assert_eq!(out.epoch, 9);
        assert_eq!(out.text, "You said: hello");
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(generator.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_failures_are_consumed_in_order() {
        let synth =
            ScriptedSynthesizer::new(Duration::from_millis(10)).with_failures(1, FailureMode::Error);
        assert!(synth.synthesize("a b", 1).await.is_err());
        let audio = synth.synthesize("a b", 1).await.unwrap();
        assert_eq!(audio.duration(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_simulated_playback() {
        let speaker = std::sync::Arc::new(SimulatedPlayback::new());
        let s = std::sync::Arc::clone(&speaker);
        let task = tokio::spawn(async move {
            s.play(AudioBuffer::new(vec![0.0; 16_000], SIM_SAMPLE_RATE))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(speaker.is_playing());

        speaker.stop();
        assert!(!speaker.is_playing());
        assert_eq!(task.await.unwrap().unwrap(), PlaybackEnd::Stopped);

        let rec = &speaker.records()[0];
        assert_eq!(rec.end, Some(PlaybackEnd::Stopped));
        assert!(rec.ended_at.unwrap() - rec.started_at < Duration::from_millis(150));
    }
}
