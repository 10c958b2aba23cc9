//! The playback gate: the synchronous boundary to the speaker.
//!
//! `play` hands a buffer to the backend on a spawned task and reports
//! completion on a channel. `stop` is synchronous and bounded by a hard
//! budget; it silences the backend, then aborts the playback task so no
//! completion from the stopped session is ever delivered.

use crate::error::{CascadeError, Result};
use crate::pipeline::messages::AudioBuffer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// How a `play` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Every sample was played.
    Finished,
    /// `stop()` cut playback short.
    Stopped,
}

/// Audio output device.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Play `audio`, resolving once it has finished or been stopped.
    async fn play(&self, audio: AudioBuffer) -> Result<PlaybackEnd>;

    /// Silence output now. Must not block past the stop budget.
    fn stop(&self);
}

/// Identifies one playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioHandle(u64);

impl AudioHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AudioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback-{}", self.0)
    }
}

/// The single playback the gate allows at a time.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub handle: AudioHandle,
    /// Epoch of the turn whose response is playing.
    pub epoch: u64,
    pub started_at: Instant,
    pub active: bool,
}

/// Completion report from a playback task.
#[derive(Debug)]
pub struct PlaybackCompletion {
    pub handle: AudioHandle,
    pub epoch: u64,
    pub result: Result<PlaybackEnd>,
}

/// Result of a hard stop.
#[derive(Debug, Clone, Copy)]
pub struct StopReport {
    pub handle: AudioHandle,
    pub epoch: u64,
    /// Wall time spent inside the backend's `stop()`.
    pub elapsed: Duration,
    pub within_budget: bool,
}

/// Owns the playback session and the backend.
pub struct PlaybackGate {
    backend: Arc<dyn PlaybackBackend>,
    stop_budget: Duration,
    done_tx: mpsc::UnboundedSender<PlaybackCompletion>,
    session: Option<PlaybackSession>,
    task: Option<JoinHandle<()>>,
    next_handle: u64,
}

impl PlaybackGate {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        stop_budget: Duration,
        done_tx: mpsc::UnboundedSender<PlaybackCompletion>,
    ) -> Self {
        Self {
            backend,
            stop_budget,
            done_tx,
            session: None,
            task: None,
            next_handle: 0,
        }
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.active)
    }

    /// Start playing `audio` for the turn at `epoch`.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Invariant`] if a session is already active.
    /// The coordinator's state machine never allows that.
    pub fn play(&mut self, audio: AudioBuffer, epoch: u64) -> Result<AudioHandle> {
        if let Some(active) = self.session.as_ref().filter(|s| s.active) {
            let msg = format!(
                "play requested for epoch {epoch} while {} (epoch {}) is active",
                active.handle, active.epoch
            );
            error!("{msg}");
            debug_assert!(false, "{msg}");
            return Err(CascadeError::Invariant(msg));
        }

        self.next_handle += 1;
        let handle = AudioHandle(self.next_handle);
        let backend = Arc::clone(&self.backend);
        let tx = self.done_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let result = backend.play(audio).await;
            let _ = tx.send(PlaybackCompletion {
                handle,
                epoch,
                result,
            });
        }));
        self.session = Some(PlaybackSession {
            handle,
            epoch,
            started_at: Instant::now(),
            active: true,
        });
        info!(%handle, epoch, "playback started");
        Ok(handle)
    }

    /// Silence the speaker and end the active session, if any.
    pub fn stop(&mut self) -> Option<StopReport> {
        let report = self.silence();
        self.close_session();
        report
    }

    /// Silence the speaker without closing the session record.
    ///
    /// The playback task is aborted, so the silenced session never reports
    /// completion. Follow up with [`close_session`](Self::close_session).
    pub fn silence(&mut self) -> Option<StopReport> {
        let session = self.session.as_ref().filter(|s| s.active)?;
        let (handle, epoch) = (session.handle, session.epoch);

        let started = std::time::Instant::now();
        self.backend.stop();
        let elapsed = started.elapsed();

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let within_budget = elapsed <= self.stop_budget;
        if within_budget {
            debug!(%handle, elapsed_ms = elapsed.as_millis(), "playback silenced");
        } else {
            let err = CascadeError::StopBudgetExceeded {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                budget_ms: u64::try_from(self.stop_budget.as_millis()).unwrap_or(u64::MAX),
            };
            error!(%handle, "{err}");
        }

        Some(StopReport {
            handle,
            epoch,
            elapsed,
            within_budget,
        })
    }

    /// Mark the session inactive and forget it.
    pub fn close_session(&mut self) -> Option<PlaybackSession> {
        self.task = None;
        let mut session = self.session.take()?;
        session.active = false;
        Some(session)
    }

    /// Close the session a completion report belongs to.
    ///
    /// Returns `None` for reports from sessions that were already stopped.
    pub fn finish(&mut self, handle: AudioHandle) -> Option<PlaybackSession> {
        if !self
            .session
            .as_ref()
            .is_some_and(|s| s.active && s.handle == handle)
        {
            return None;
        }
        self.close_session()
    }
}

impl Drop for PlaybackGate {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalPlayback;

#[cfg(feature = "cpal")]
mod cpal_backend {
    use super::{PlaybackBackend, PlaybackEnd};
    use crate::config::PlaybackConfig;
    use crate::error::{CascadeError, Result};
    use crate::pipeline::messages::AudioBuffer;
    use async_trait::async_trait;
    use cpal::StreamConfig;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::{error, info};

    /// Speaker output via cpal.
    ///
    /// `stop()` raises a flag the output callback checks on every period, so
    /// the next callback writes silence.
    pub struct CpalPlayback {
        device: Arc<Mutex<cpal::Device>>,
        stream_config: StreamConfig,
        stop_flag: Arc<AtomicBool>,
    }

    impl CpalPlayback {
        /// Open the configured (or default) output device.
        ///
        /// # Errors
        ///
        /// Returns an error if no output device is available.
        pub fn new(config: &PlaybackConfig) -> Result<Self> {
            let host = cpal::default_host();

            let device = if let Some(ref name) = config.output_device {
                host.output_devices()
                    .map_err(|e| CascadeError::Playback(format!("cannot enumerate devices: {e}")))?
                    .find(|d| {
                        d.description()
                            .ok()
                            .map(|desc| desc.name() == name)
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| {
                        CascadeError::Playback(format!("output device '{name}' not found"))
                    })?
            } else {
                host.default_output_device()
                    .ok_or_else(|| CascadeError::Playback("no default output device".into()))?
            };

            let device_name = device
                .description()
                .map(|d| d.name().to_owned())
                .unwrap_or_else(|_| "<unknown>".into());
            info!("using output device: {device_name}");

            let stream_config = StreamConfig {
                channels: 1,
                sample_rate: config.output_sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            Ok(Self {
                device: Arc::new(Mutex::new(device)),
                stream_config,
                stop_flag: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    /// Playback progress shared with the output callback.
    struct PlaybackBuffer {
        audio: AudioBuffer,
        position: usize,
        finished: bool,
    }

    /// Blocking playback loop; the cpal stream is not `Send`, so it lives and
    /// dies on one blocking thread.
    fn play_blocking(
        device: &Mutex<cpal::Device>,
        config: &StreamConfig,
        audio: AudioBuffer,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<PlaybackEnd> {
        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            audio,
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);
        let callback_stop = Arc::clone(&stop_flag);

        let device = device
            .lock()
            .map_err(|e| CascadeError::Playback(format!("output device lock poisoned: {e}")))?;
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    if callback_stop.load(Ordering::Acquire) {
                        data.fill(0.0);
                        buf.finished = true;
                        return;
                    }
                    for sample in data.iter_mut() {
                        if buf.position < buf.audio.samples.len() {
                            *sample = buf.audio.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| CascadeError::Playback(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| CascadeError::Playback(format!("failed to start output stream: {e}")))?;

        loop {
            std::thread::sleep(std::time::Duration::from_millis(10));
            if stop_flag.load(Ordering::Acquire) {
                drop(stream);
                return Ok(PlaybackEnd::Stopped);
            }
            let buf = buffer
                .lock()
                .map_err(|e| CascadeError::Playback(format!("playback buffer lock poisoned: {e}")))?;
            if buf.finished {
                break;
            }
        }

        drop(stream);
        Ok(PlaybackEnd::Finished)
    }

    #[async_trait]
    impl PlaybackBackend for CpalPlayback {
        async fn play(&self, audio: AudioBuffer) -> Result<PlaybackEnd> {
            self.stop_flag.store(false, Ordering::Release);
            let device = Arc::clone(&self.device);
            let config = self.stream_config.clone();
            let stop_flag = Arc::clone(&self.stop_flag);
            tokio::task::spawn_blocking(move || play_blocking(&device, &config, audio, stop_flag))
                .await
                .map_err(|e| CascadeError::Playback(format!("playback thread failed: {e}")))?
        }

        fn stop(&self) {
            self.stop_flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::sim::SimulatedPlayback;

    fn gate() -> (
        PlaybackGate,
        Arc<SimulatedPlayback>,
        mpsc::UnboundedReceiver<PlaybackCompletion>,
    ) {
        let backend = Arc::new(SimulatedPlayback::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = PlaybackGate::new(
            Arc::clone(&backend) as Arc<dyn PlaybackBackend>,
            Duration::from_millis(100),
            tx,
        );
        (gate, backend, rx)
    }

    fn one_second() -> AudioBuffer {
        AudioBuffer::new(vec![0.2; 16_000], 16_000)
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_reported_after_audio_duration() {
        let (mut gate, _backend, mut rx) = gate();
        let start = Instant::now();
        let handle = gate.play(one_second(), 4).unwrap();
        assert!(gate.is_active());

        let done = rx.recv().await.unwrap();
        assert_eq!(done.handle, handle);
        assert_eq!(done.epoch, 4);
        assert_eq!(done.result.unwrap(), PlaybackEnd::Finished);
        assert!(start.elapsed() >= Duration::from_secs(1));

        let session = gate.finish(handle).unwrap();
        assert!(!session.active);
        assert!(!gate.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_and_suppresses_completion() {
        let (mut gate, backend, mut rx) = gate();
        let handle = gate.play(one_second(), 1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = gate.stop().unwrap();
        assert_eq!(report.handle, handle);
        assert!(report.within_budget);
        assert!(!gate.is_active());
        assert!(!backend.is_playing());
        assert_eq!(backend.stop_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert!(gate.finish(handle).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_session_is_a_noop() {
        let (mut gate, backend, _rx) = gate();
        assert!(gate.stop().is_none());
        assert_eq!(backend.stop_count(), 0);
    }

    #[cfg(debug_assertions)]
    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "is active")]
    async fn second_play_while_active_is_a_bug() {
        let (mut gate, _backend, _rx) = gate();
        gate.play(one_second(), 1).unwrap();
        let _ = gate.play(one_second(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_ignores_foreign_handles() {
        let (mut gate, _backend, _rx) = gate();
        let handle = gate.play(one_second(), 1).unwrap();
        assert!(gate.finish(AudioHandle(handle.id() + 1)).is_none());
        assert!(gate.is_active());
    }
}
