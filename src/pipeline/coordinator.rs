//! The turn coordinator: a single-writer actor that owns all per-turn state.
//!
//! Transcription events, interrupt commands, cascade stage callbacks and
//! service/playback completions all arrive as messages and are handled one
//! at a time on the actor task. Interrupt commands are polled first so a
//! hard stop is never queued behind pipeline work.

use crate::audio::playback::{PlaybackBackend, PlaybackCompletion, PlaybackGate};
use crate::config::CascadeConfig;
use crate::error::{CascadeError, Result};
use crate::pipeline::cache::{CacheSnapshot, PipelineCache};
use crate::pipeline::messages::{
    ActivityEvent, AudioBuffer, GeneratedText, InterruptCommand, InterruptReason,
};
use crate::runtime::RuntimeEvent;
use crate::services::retry::{RetryPolicy, call_with_retry};
use crate::services::{GenerationService, SynthesisService};
use crate::turn::TurnState;
use crate::turn::activity::ActivityTracker;
use crate::turn::cascade::{CascadeScheduler, Stage, StageDue, StageToken};
use crate::turn::interrupt::{HardStopTargets, InterruptionController, Verdict};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered transcription events before `send_activity` applies backpressure.
const ACTIVITY_CHANNEL_SIZE: usize = 64;

/// Point-in-time view of the coordinator, for UIs and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub state: TurnState,
    pub epoch: u64,
    pub accumulated_text: String,
    pub cache: CacheSnapshot,
    pub playback_active: bool,
    /// Whether a cascade schedule is live.
    pub cascade_armed: bool,
}

/// Cloneable input side of a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    activity_tx: mpsc::Sender<ActivityEvent>,
    interrupt_tx: mpsc::UnboundedSender<InterruptCommand>,
    query_tx: mpsc::UnboundedSender<oneshot::Sender<CoordinatorSnapshot>>,
    cancel: CancellationToken,
}

impl CoordinatorHandle {
    /// Deliver one transcription update, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Channel`] if the coordinator has stopped.
    pub async fn send_activity(&self, evt: ActivityEvent) -> Result<()> {
        self.activity_tx
            .send(evt)
            .await
            .map_err(|_| CascadeError::Channel("coordinator stopped; activity dropped".into()))
    }

    /// Request a hard stop (voice command or manual).
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Channel`] if the coordinator has stopped.
    pub fn interrupt(&self, reason: InterruptReason) -> Result<()> {
        self.interrupt_tx
            .send(InterruptCommand::new(reason))
            .map_err(|_| CascadeError::Channel("coordinator stopped; interrupt dropped".into()))
    }

    /// Ask the actor for a snapshot of its state.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Channel`] if the coordinator has stopped.
    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send(tx)
            .map_err(|_| CascadeError::Channel("coordinator stopped".into()))?;
        rx.await
            .map_err(|_| CascadeError::Channel("coordinator stopped before replying".into()))
    }

    /// Request graceful shutdown of the coordinator.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Feed a transcription stream into the coordinator until it ends.
///
/// # Errors
///
/// Returns [`CascadeError::Channel`] if the coordinator stops first.
pub async fn drive_transcription<S>(stream: S, handle: CoordinatorHandle) -> Result<()>
where
    S: Stream<Item = ActivityEvent>,
{
    tokio::pin!(stream);
    let mut forwarded = 0usize;
    while let Some(evt) = stream.next().await {
        handle.send_activity(evt).await?;
        forwarded += 1;
    }
    debug!(forwarded, "transcription stream ended");
    Ok(())
}

/// Orchestrates the cascade: activity in, speculative work out, one voice.
pub struct PipelineCoordinator {
    config: CascadeConfig,
    generator: Arc<dyn GenerationService>,
    synthesizer: Arc<dyn SynthesisService>,
    playback: Arc<dyn PlaybackBackend>,
    cancel: CancellationToken,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    fallback_audio: Option<AudioBuffer>,
    activity_tx: mpsc::Sender<ActivityEvent>,
    activity_rx: mpsc::Receiver<ActivityEvent>,
    interrupt_tx: mpsc::UnboundedSender<InterruptCommand>,
    interrupt_rx: mpsc::UnboundedReceiver<InterruptCommand>,
    query_tx: mpsc::UnboundedSender<oneshot::Sender<CoordinatorSnapshot>>,
    query_rx: mpsc::UnboundedReceiver<oneshot::Sender<CoordinatorSnapshot>>,
}

impl PipelineCoordinator {
    pub fn new(
        config: CascadeConfig,
        generator: Arc<dyn GenerationService>,
        synthesizer: Arc<dyn SynthesisService>,
        playback: Arc<dyn PlaybackBackend>,
    ) -> Self {
        let (activity_tx, activity_rx) = mpsc::channel(ACTIVITY_CHANNEL_SIZE);
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        Self {
            config,
            generator,
            synthesizer,
            playback,
            cancel: CancellationToken::new(),
            runtime_tx: None,
            fallback_audio: None,
            activity_tx,
            activity_rx,
            interrupt_tx,
            interrupt_rx,
            query_tx,
            query_rx,
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Pre-rendered audio to play when synthesis fails.
    ///
    /// Without it the fallback text is synthesized on first need and kept.
    pub fn with_fallback_audio(mut self, audio: AudioBuffer) -> Self {
        self.fallback_audio = Some(audio);
        self
    }

    /// Input handle. Create handles before calling [`run`](Self::run); the
    /// coordinator stops once every handle is dropped.
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            activity_tx: self.activity_tx.clone(),
            interrupt_tx: self.interrupt_tx.clone(),
            query_tx: self.query_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the actor until cancelled or every handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            generator,
            synthesizer,
            playback,
            cancel,
            runtime_tx,
            fallback_audio,
            activity_tx,
            mut activity_rx,
            interrupt_tx,
            mut interrupt_rx,
            query_tx,
            mut query_rx,
        } = self;
        config.validate()?;
        // Only external handles keep the inputs open.
        drop((activity_tx, interrupt_tx, query_tx));

        let (due_tx, mut due_rx) = mpsc::unbounded_channel::<StageDue>();
        let (work_tx, mut work_rx) = mpsc::unbounded_channel::<WorkDone>();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PlaybackCompletion>();

        let mut actor = TurnActor {
            state: TurnState::Listening,
            tracker: ActivityTracker::new(),
            scheduler: CascadeScheduler::new(config.cascade.clone(), due_tx),
            cache: PipelineCache::new(),
            gate: PlaybackGate::new(
                playback,
                Duration::from_millis(config.barge_in.stop_budget_ms),
                done_tx,
            ),
            controller: InterruptionController::new(config.barge_in.clone()),
            generation_policy: RetryPolicy::new(
                "generation",
                config.services.generation_timeout_ms,
                config.services.retries,
            ),
            synthesis_policy: RetryPolicy::new(
                "synthesis",
                config.services.synthesis_timeout_ms,
                config.services.retries,
            ),
            fallback_text: config.services.fallback_text.clone(),
            fallback_audio,
            generator,
            synthesizer,
            work_tx,
            runtime_tx,
        };

        info!(
            stage1_ms = config.cascade.stage1_ms,
            stage2_ms = config.cascade.stage2_ms,
            stage3_ms = config.cascade.stage3_ms,
            "cascade coordinator running"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(cmd) = interrupt_rx.recv() => actor.on_interrupt_command(cmd),
                evt = activity_rx.recv() => match evt {
                    Some(evt) => actor.on_activity(evt),
                    None => {
                        debug!("all coordinator handles dropped");
                        break;
                    }
                },
                Some(reply) = query_rx.recv() => {
                    let _ = reply.send(actor.snapshot());
                }
                Some(done) = done_rx.recv() => actor.on_playback_done(done),
                Some(work) = work_rx.recv() => actor.on_work_done(work),
                Some(due) = due_rx.recv() => actor.on_stage_due(due),
            }
        }

        actor.shutdown();
        info!("cascade coordinator stopped");
        Ok(())
    }
}

/// Completion of a spawned service call.
enum WorkDone {
    Generation {
        token: StageToken,
        epoch: u64,
        result: Result<GeneratedText>,
    },
    Synthesis {
        token: StageToken,
        epoch: u64,
        text: String,
        result: Result<AudioBuffer>,
    },
}

/// State owned by the actor task. Nothing here is shared.
struct TurnActor {
    state: TurnState,
    tracker: ActivityTracker,
    scheduler: CascadeScheduler,
    cache: PipelineCache,
    gate: PlaybackGate,
    controller: InterruptionController,
    generation_policy: RetryPolicy,
    synthesis_policy: RetryPolicy,
    fallback_text: String,
    /// Configured, or memoized after the fallback text was first synthesized.
    fallback_audio: Option<AudioBuffer>,
    generator: Arc<dyn GenerationService>,
    synthesizer: Arc<dyn SynthesisService>,
    work_tx: mpsc::UnboundedSender<WorkDone>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl TurnActor {
    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(?from, ?to, "turn state");
        self.emit(RuntimeEvent::StateChanged { from, to });
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            state: self.state,
            epoch: self.tracker.epoch(),
            accumulated_text: self.tracker.accumulated_text(),
            cache: self.cache.snapshot(),
            playback_active: self.gate.is_active(),
            cascade_armed: self.scheduler.live().is_some(),
        }
    }

    // -- inputs --

    fn on_activity(&mut self, evt: ActivityEvent) {
        let now = Instant::now();
        match self.controller.evaluate(&evt, self.gate.session(), now) {
            Verdict::NotSpeaking => {}
            Verdict::Echo => {
                debug!(
                    text = %evt.text,
                    confidence = evt.confidence,
                    "activity during playback ignored as echo"
                );
                return;
            }
            Verdict::Interrupt => {
                info!(text = %evt.text, confidence = evt.confidence, "user barged in");
                self.hard_stop(InterruptReason::Speech);
            }
        }
        self.accept_activity(&evt, now);
    }

    fn accept_activity(&mut self, evt: &ActivityEvent, now: Instant) {
        let (outcome, schedule) = self.tracker.on_event(evt, now, &mut self.scheduler);
        if outcome.started_turn {
            self.emit(RuntimeEvent::TurnStarted {
                epoch: outcome.epoch,
            });
        }
        if self.cache.bind(outcome.epoch, schedule.token) {
            debug!(epoch = outcome.epoch, "new speech superseded speculative work");
        }
        self.set_state(TurnState::Accumulating);
    }

    fn on_interrupt_command(&mut self, cmd: InterruptCommand) {
        if self.state == TurnState::Listening {
            debug!(reason = ?cmd.reason, "interrupt with no turn in progress ignored");
            return;
        }
        self.hard_stop(cmd.reason);
        self.emit(RuntimeEvent::RecognitionReset);
    }

    fn hard_stop(&mut self, reason: InterruptReason) {
        let outcome = self.controller.hard_stop(
            reason,
            HardStopTargets {
                gate: &mut self.gate,
                scheduler: &mut self.scheduler,
                tracker: &mut self.tracker,
                cache: &mut self.cache,
            },
        );
        if let Some(stop) = outcome.stop {
            self.emit(RuntimeEvent::PlaybackStopped {
                epoch: stop.epoch,
                session: stop.handle.id(),
                elapsed_ms: u64::try_from(stop.elapsed.as_millis()).unwrap_or(u64::MAX),
            });
        }
        self.emit(RuntimeEvent::Interrupted {
            reason,
            old_epoch: outcome.old_epoch,
            new_epoch: outcome.new_epoch,
        });
        self.set_state(TurnState::Listening);
    }

    // -- cascade stages --

    fn on_stage_due(&mut self, due: StageDue) {
        if !self.scheduler.is_live(due.token) {
            debug!(stage = %due.stage, token = %due.token, "superseded stage callback dropped");
            return;
        }
        let epoch = self.tracker.epoch();
        debug!(stage = %due.stage, token = %due.token, epoch, "stage fired");
        self.emit(RuntimeEvent::StageFired {
            stage: due.stage,
            epoch,
        });

        match due.stage {
            Stage::Generate => self.start_generation(due.token),
            Stage::Synthesize => {
                if self.cache.generated_text().is_some() {
                    self.start_synthesis(due.token);
                } else {
                    self.cache.wait_for_generation();
                    // No-op if stage 1 already claimed the slot.
                    self.start_generation(due.token);
                }
            }
            Stage::Playback => {
                if self.cache.synthesized_audio().is_some() {
                    self.start_playback(due.token);
                } else {
                    self.cache.wait_for_synthesis();
                }
            }
        }
    }

    fn start_generation(&mut self, token: StageToken) {
        let epoch = self.tracker.epoch();
        let context = self.tracker.accumulated_text();
        if context.trim().is_empty() {
            if self.state == TurnState::Accumulating {
                self.end_turn("no words recognized");
            }
            return;
        }
        if !self.cache.try_begin_generation(epoch, token) {
            return;
        }
        info!(epoch, %context, "generating response");
        self.emit(RuntimeEvent::GenerationStarted {
            epoch,
            context: context.clone(),
        });

        let generator = Arc::clone(&self.generator);
        let policy = self.generation_policy;
        let tx = self.work_tx.clone();
        tokio::spawn(async move {
            let result = call_with_retry(policy, || generator.generate(&context, epoch)).await;
            let _ = tx.send(WorkDone::Generation {
                token,
                epoch,
                result,
            });
        });
    }

    fn start_synthesis(&mut self, token: StageToken) {
        let epoch = self.tracker.epoch();
        let Some(text) = self.cache.try_begin_synthesis(epoch, token) else {
            return;
        };
        self.spawn_synthesis(token, epoch, text);
    }

    /// Call the synthesizer. The cache's synthesis slot must already be claimed.
    fn spawn_synthesis(&self, token: StageToken, epoch: u64, text: String) {
        debug!(epoch, %text, "synthesizing");
        self.emit(RuntimeEvent::SynthesisStarted {
            epoch,
            text: text.clone(),
        });

        let synthesizer = Arc::clone(&self.synthesizer);
        let policy = self.synthesis_policy;
        let tx = self.work_tx.clone();
        tokio::spawn(async move {
            let result = call_with_retry(policy, || synthesizer.synthesize(&text, epoch)).await;
            let _ = tx.send(WorkDone::Synthesis {
                token,
                epoch,
                text,
                result,
            });
        });
    }

    fn start_playback(&mut self, token: StageToken) {
        let epoch = self.tracker.epoch();
        if !self.cache.accepts(epoch, token) || self.gate.is_active() {
            return;
        }
        let Some(audio) = self.cache.synthesized_audio().cloned() else {
            return;
        };
        match self.gate.play(audio, epoch) {
            Ok(handle) => {
                self.set_state(TurnState::Speaking);
                self.emit(RuntimeEvent::PlaybackStarted {
                    epoch,
                    session: handle.id(),
                });
            }
            Err(e) => {
                error!(epoch, "could not start playback: {e}");
                self.emit(RuntimeEvent::PlaybackFailed {
                    epoch,
                    error: e.to_string(),
                });
                self.end_turn("playback could not start");
            }
        }
    }

    // -- completions --

    fn is_stale(&self, epoch: u64, token: StageToken) -> bool {
        epoch != self.tracker.epoch()
            || !self.scheduler.is_live(token)
            || !self.cache.accepts(epoch, token)
    }

    fn discard_stale(&self, stage: Stage, result_epoch: u64) {
        let live_epoch = self.tracker.epoch();
        debug!(%stage, result_epoch, live_epoch, "stale result discarded");
        self.emit(RuntimeEvent::StaleResultDiscarded {
            stage,
            result_epoch,
            live_epoch,
        });
    }

    fn on_work_done(&mut self, work: WorkDone) {
        match work {
            WorkDone::Generation {
                token,
                epoch,
                result,
            } => self.on_generation_done(token, epoch, result),
            WorkDone::Synthesis {
                token,
                epoch,
                text,
                result,
            } => self.on_synthesis_done(token, epoch, &text, result),
        }
    }

    fn on_generation_done(
        &mut self,
        token: StageToken,
        epoch: u64,
        result: Result<GeneratedText>,
    ) {
        if self.is_stale(epoch, token) {
            self.discard_stale(Stage::Generate, epoch);
            return;
        }

        let (text, fallback) = match result {
            Ok(generated) if generated.epoch == epoch => (generated.text, false),
            Ok(generated) => {
                warn!(
                    requested = epoch,
                    echoed = generated.epoch,
                    "generation answered for the wrong epoch, using fallback"
                );
                self.discard_stale(Stage::Generate, generated.epoch);
                (self.fallback_text.clone(), true)
            }
            Err(e) => {
                warn!(epoch, "generation failed, using fallback: {e}");
                (self.fallback_text.clone(), true)
            }
        };

        if !self.cache.store_generation(epoch, token, text.clone()) {
            return;
        }
        self.emit(RuntimeEvent::GenerationReady {
            epoch,
            text,
            fallback,
        });

        if self.cache.synthesis_waiting()
            || self
                .scheduler
                .deadline_passed(Stage::Synthesize, Instant::now())
        {
            self.start_synthesis(token);
        }
    }

    fn on_synthesis_done(
        &mut self,
        token: StageToken,
        epoch: u64,
        text: &str,
        result: Result<AudioBuffer>,
    ) {
        let is_fallback_text = text == self.fallback_text;
        if is_fallback_text
            && self.fallback_audio.is_none()
            && let Ok(audio) = &result
        {
            debug!("fallback audio cached");
            self.fallback_audio = Some(audio.clone());
        }

        if self.is_stale(epoch, token) {
            self.discard_stale(Stage::Synthesize, epoch);
            return;
        }

        let (audio, fallback) = match result {
            Ok(audio) => (audio, is_fallback_text),
            Err(e) => {
                warn!(epoch, "synthesis failed: {e}");
                if let Some(audio) = self.fallback_audio.clone() {
                    (audio, true)
                } else if !is_fallback_text {
                    // Slot stays claimed while the fallback text is rendered.
                    let fallback_text = self.fallback_text.clone();
                    self.spawn_synthesis(token, epoch, fallback_text);
                    return;
                } else {
                    self.cache.abandon_synthesis(epoch, token);
                    self.end_turn("no audio could be synthesized");
                    return;
                }
            }
        };

        let duration_ms = u64::try_from(audio.duration().as_millis()).unwrap_or(u64::MAX);
        if !self.cache.store_synthesis(epoch, token, audio) {
            return;
        }
        self.emit(RuntimeEvent::SynthesisReady {
            epoch,
            duration_ms,
            fallback,
        });

        let waiting = self.cache.take_playback_waiting();
        if waiting
            || self
                .scheduler
                .deadline_passed(Stage::Playback, Instant::now())
        {
            self.start_playback(token);
        }
    }

    fn on_playback_done(&mut self, done: PlaybackCompletion) {
        let Some(session) = self.gate.finish(done.handle) else {
            debug!(handle = %done.handle, "completion from a stopped session ignored");
            return;
        };
        match done.result {
            Ok(end) => {
                info!(
                    handle = %session.handle,
                    epoch = session.epoch,
                    ?end,
                    "response played"
                );
                self.emit(RuntimeEvent::TurnCompleted {
                    epoch: session.epoch,
                });
                self.end_turn("response played");
            }
            Err(e) => {
                error!(handle = %session.handle, "playback failed: {e}");
                self.emit(RuntimeEvent::PlaybackFailed {
                    epoch: session.epoch,
                    error: e.to_string(),
                });
                self.end_turn("playback failed");
            }
        }
    }

    /// Close the live turn and go back to listening.
    fn end_turn(&mut self, why: &str) {
        self.scheduler.cancel_all();
        if let Some(turn) = self.tracker.end_turn() {
            debug!(turn = %turn.id, epoch = turn.epoch, why, "turn ended");
        }
        self.cache.clear(self.tracker.epoch());
        self.set_state(TurnState::Listening);
        self.emit(RuntimeEvent::RecognitionReset);
    }

    fn shutdown(&mut self) {
        let _ = self.gate.stop();
        self.scheduler.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::sim::{ScriptedGenerator, ScriptedSynthesizer, SimulatedPlayback};

    fn coordinator(config: CascadeConfig) -> PipelineCoordinator {
        PipelineCoordinator::new(
            config,
            Arc::new(ScriptedGenerator::new(Duration::from_millis(100))),
            Arc::new(ScriptedSynthesizer::new(Duration::from_millis(100))),
            Arc::new(SimulatedPlayback::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_coordinator_is_listening() {
        let coord = coordinator(CascadeConfig::default());
        let handle = coord.handle();
        let task = tokio::spawn(coord.run());

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, TurnState::Listening);
        assert_eq!(snap.epoch, 0);
        assert!(snap.cache.is_empty());
        assert!(!snap.cascade_armed);

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected_at_startup() {
        let mut config = CascadeConfig::default();
        config.cascade.stage2_ms = config.cascade.stage1_ms;
        let coord = coordinator(config);
        let _handle = coord.handle();

        assert!(matches!(coord.run().await, Err(CascadeError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_stops_the_actor() {
        let coord = coordinator(CascadeConfig::default());
        let handle = coord.handle();
        let task = tokio::spawn(coord.run());
        drop(handle);

        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_while_listening_is_ignored() {
        let coord = coordinator(CascadeConfig::default());
        let handle = coord.handle();
        let task = tokio::spawn(coord.run());

        handle.interrupt(InterruptReason::Manual).unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, TurnState::Listening);
        assert_eq!(snap.epoch, 0);

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn calls_after_shutdown_report_channel_errors() {
        let coord = coordinator(CascadeConfig::default());
        let handle = coord.handle();
        let task = tokio::spawn(coord.run());
        handle.shutdown();
        task.await.unwrap().unwrap();

        assert!(matches!(
            handle.send_activity(ActivityEvent::partial("hi", 0.9)).await,
            Err(CascadeError::Channel(_))
        ));
        assert!(matches!(
            handle.interrupt(InterruptReason::Manual),
            Err(CascadeError::Channel(_))
        ));
        assert!(handle.snapshot().await.is_err());
    }
}
