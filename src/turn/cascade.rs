//! The stage cascade: three deadlines re-armed on every activity event.
//!
//! Timers are fire-and-check. Each armed schedule gets a fresh
//! [`StageToken`]; a stage callback that arrives carrying anything other
//! than the live token is a no-op. The per-schedule [`CancellationToken`]
//! only lets superseded timer tasks exit early; correctness never depends
//! on it.

use crate::config::{CascadeOffsets, CascadeTimingConfig};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The three speculative stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Start text generation.
    Generate,
    /// Start speech synthesis.
    Synthesize,
    /// Start playback.
    Playback,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Generate, Stage::Synthesize, Stage::Playback];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generate => "generate",
            Self::Synthesize => "synthesize",
            Self::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// Identity of one armed schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageToken(u64);

impl fmt::Display for StageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A stage deadline elapsed for the schedule identified by `token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDue {
    pub stage: Stage,
    pub token: StageToken,
}

/// Three deadlines computed from one activity instant. Replaced, never mutated.
#[derive(Debug, Clone)]
pub struct CascadeSchedule {
    pub stage1_at: Instant,
    pub stage2_at: Instant,
    pub stage3_at: Instant,
    pub token: StageToken,
    cancel: CancellationToken,
}

impl CascadeSchedule {
    pub fn deadline(&self, stage: Stage) -> Instant {
        match stage {
            Stage::Generate => self.stage1_at,
            Stage::Synthesize => self.stage2_at,
            Stage::Playback => self.stage3_at,
        }
    }
}

/// Owns the live schedule and spawns its timer tasks.
pub struct CascadeScheduler {
    timing: CascadeTimingConfig,
    due_tx: mpsc::UnboundedSender<StageDue>,
    next_token: u64,
    live: Option<CascadeSchedule>,
}

impl CascadeScheduler {
    /// Stage callbacks are delivered on `due_tx`.
    pub fn new(timing: CascadeTimingConfig, due_tx: mpsc::UnboundedSender<StageDue>) -> Self {
        Self {
            timing,
            due_tx,
            next_token: 0,
            live: None,
        }
    }

    /// Replace the live schedule with one armed relative to `now`.
    ///
    /// `word_count` and `spoken` (time since the turn started) feed the
    /// adaptive delay and the silence confirmation window. Both are no-ops
    /// when disabled.
    pub fn rearm(
        &mut self,
        now: Instant,
        word_count: usize,
        spoken: Duration,
    ) -> CascadeSchedule {
        self.invalidate();

        self.next_token += 1;
        let token = StageToken(self.next_token);
        let CascadeOffsets {
            stage1,
            stage2,
            stage3,
        } = self.timing.offsets_for(word_count, spoken);
        let schedule = CascadeSchedule {
            stage1_at: now + stage1,
            stage2_at: now + stage2,
            stage3_at: now + stage3,
            token,
            cancel: CancellationToken::new(),
        };
        debug_assert!(schedule.stage1_at < schedule.stage2_at);
        debug_assert!(schedule.stage2_at < schedule.stage3_at);

        for stage in Stage::ALL {
            let deadline = schedule.deadline(stage);
            let cancel = schedule.cancel.clone();
            let tx = self.due_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {
                        let _ = tx.send(StageDue { stage, token });
                    }
                }
            });
        }

        debug!(%token, "cascade armed");
        self.live = Some(schedule.clone());
        schedule
    }

    /// Invalidate the live schedule without arming a replacement.
    pub fn cancel_all(&mut self) {
        if self.invalidate() {
            debug!("cascade cancelled");
        }
    }

    /// Whether `token` identifies the live schedule.
    pub fn is_live(&self, token: StageToken) -> bool {
        self.live.as_ref().is_some_and(|s| s.token == token)
    }

    pub fn live(&self) -> Option<&CascadeSchedule> {
        self.live.as_ref()
    }

    pub fn live_token(&self) -> Option<StageToken> {
        self.live.as_ref().map(|s| s.token)
    }

    /// Whether the live schedule's deadline for `stage` has passed.
    pub fn deadline_passed(&self, stage: Stage, now: Instant) -> bool {
        self.live.as_ref().is_some_and(|s| s.deadline(stage) <= now)
    }

    fn invalidate(&mut self) -> bool {
        match self.live.take() {
            Some(old) => {
                old.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for CascadeScheduler {
    fn drop(&mut self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::time::Duration;

    fn scheduler() -> (CascadeScheduler, mpsc::UnboundedReceiver<StageDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CascadeScheduler::new(CascadeTimingConfig::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_are_monotonic_offsets_from_now() {
        let (mut sched, _rx) = scheduler();
        let now = Instant::now();
        let s = sched.rearm(now, 4, Duration::ZERO);

        assert_eq!(s.stage1_at, now + Duration::from_millis(500));
        assert_eq!(s.stage2_at, now + Duration::from_millis(1500));
        assert_eq!(s.stage3_at, now + Duration::from_millis(2000));
        assert!(s.stage1_at < s.stage2_at && s.stage2_at < s.stage3_at);
    }

    #[tokio::test(start_paused = true)]
    async fn stages_fire_in_order_with_live_token() {
        let (mut sched, mut rx) = scheduler();
        let start = Instant::now();
        let s = sched.rearm(start, 1, Duration::ZERO);

        for expected in Stage::ALL {
            let due = rx.recv().await.unwrap();
            assert_eq!(due.stage, expected);
            assert_eq!(due.token, s.token);
            assert!(Instant::now() >= s.deadline(expected));
        }
        assert!(sched.is_live(s.token));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_supersedes_previous_schedule() {
        let (mut sched, mut rx) = scheduler();
        let first = sched.rearm(Instant::now(), 1, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let second = sched.rearm(Instant::now(), 2, Duration::ZERO);

        assert!(!sched.is_live(first.token));
        assert!(sched.is_live(second.token));

        let mut fired = Vec::new();
        while fired.len() < 3 {
            fired.push(rx.recv().await.unwrap());
        }
        assert!(fired.iter().all(|d| d.token == second.token));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_silences_the_cascade() {
        let (mut sched, mut rx) = scheduler();
        let s = sched.rearm(Instant::now(), 1, Duration::ZERO);
        sched.cancel_all();

        assert!(!sched.is_live(s.token));
        assert!(sched.live_token().is_none());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_passed_tracks_live_schedule() {
        let (mut sched, _rx) = scheduler();
        let now = Instant::now();
        sched.rearm(now, 1, Duration::ZERO);

        assert!(!sched.deadline_passed(Stage::Synthesize, now));
        assert!(sched.deadline_passed(Stage::Synthesize, now + Duration::from_millis(1500)));
        sched.cancel_all();
        assert!(!sched.deadline_passed(Stage::Generate, now + Duration::from_secs(10)));
    }
}
