//! Activity tracking: accumulates the user's utterance from transcription
//! updates and resets the cascade on every one of them.

use crate::pipeline::messages::ActivityEvent;
use crate::turn::cascade::{CascadeSchedule, CascadeScheduler};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// One user-utterance-to-response cycle.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// Correlation id for logs.
    pub id: Uuid,
    /// Epoch results for this turn must carry.
    pub epoch: u64,
    pub started_at: Instant,
    /// Finalized segments, space-joined.
    committed: String,
    /// Live preview of the segment currently being recognized.
    partial: String,
}

impl ConversationTurn {
    fn new(epoch: u64, started_at: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            started_at,
            committed: String::new(),
            partial: String::new(),
        }
    }

    /// Committed text followed by the live partial tail.
    pub fn accumulated_text(&self) -> String {
        match (self.committed.is_empty(), self.partial.is_empty()) {
            (true, _) => self.partial.clone(),
            (false, true) => self.committed.clone(),
            (false, false) => format!("{} {}", self.committed, self.partial),
        }
    }

    pub fn word_count(&self) -> usize {
        self.committed.split_whitespace().count() + self.partial.split_whitespace().count()
    }

    fn apply(&mut self, evt: &ActivityEvent) {
        let text = evt.text.trim();
        if evt.is_final {
            // A final replaces the preview it finalizes.
            if !text.is_empty() {
                if !self.committed.is_empty() {
                    self.committed.push(' ');
                }
                self.committed.push_str(text);
            }
            self.partial.clear();
        } else if !text.is_empty() {
            self.partial.clear();
            self.partial.push_str(text);
        }
    }
}

/// What an activity event did to the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOutcome {
    /// Whether this event opened a new turn.
    pub started_turn: bool,
    /// Epoch of the turn the event belongs to.
    pub epoch: u64,
}

/// Maintains the accumulated utterance and the epoch counter.
#[derive(Debug)]
pub struct ActivityTracker {
    turn: Option<ConversationTurn>,
    epoch: u64,
    /// Whether some turn already ran under `epoch`. A fresh epoch left behind
    /// by an interruption is reused by the next turn instead of bumped again.
    epoch_used: bool,
    last_activity_at: Option<Instant>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            turn: None,
            epoch: 0,
            // Epoch 0 means "no turn yet"; the first turn runs under 1.
            epoch_used: true,
            last_activity_at: None,
        }
    }

    /// Current epoch. Results computed under any other epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn turn(&self) -> Option<&ConversationTurn> {
        self.turn.as_ref()
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    pub fn accumulated_text(&self) -> String {
        self.turn
            .as_ref()
            .map(ConversationTurn::accumulated_text)
            .unwrap_or_default()
    }

    /// Invalidate everything computed under the current epoch.
    ///
    /// The new epoch counts as unused until an activity event lands in it, so
    /// the turn that follows an interruption runs under exactly this epoch.
    pub fn advance_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch_used = false;
        if let Some(turn) = self.turn.as_mut() {
            turn.epoch = self.epoch;
        }
        self.epoch
    }

    /// Drop the current turn (normal completion or interruption).
    pub fn end_turn(&mut self) -> Option<ConversationTurn> {
        self.turn.take()
    }

    /// Ingest one transcription update and rearm the cascade.
    ///
    /// Every event rearms, including empty and duplicate partials: silence is
    /// detected by the absence of events, not by their content.
    pub fn on_event(
        &mut self,
        evt: &ActivityEvent,
        now: Instant,
        scheduler: &mut CascadeScheduler,
    ) -> (ActivityOutcome, CascadeSchedule) {
        let started_turn = self.turn.is_none();
        if started_turn {
            if self.epoch_used {
                self.epoch += 1;
            }
            let turn = ConversationTurn::new(self.epoch, now);
            debug!(turn = %turn.id, epoch = turn.epoch, "turn started");
            self.turn = Some(turn);
        }
        self.epoch_used = true;

        let mut word_count = 0;
        let mut spoken = Duration::ZERO;
        if let Some(turn) = self.turn.as_mut() {
            turn.apply(evt);
            word_count = turn.word_count();
            spoken = now.saturating_duration_since(turn.started_at);
        }
        self.last_activity_at = Some(now);

        let schedule = scheduler.rearm(now, word_count, spoken);
        (
            ActivityOutcome {
                started_turn,
                epoch: self.epoch,
            },
            schedule,
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::CascadeTimingConfig;
    use tokio::sync::mpsc;

    fn scheduler() -> (CascadeScheduler, mpsc::UnboundedReceiver<crate::turn::cascade::StageDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CascadeScheduler::new(CascadeTimingConfig::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn partials_replace_the_live_preview() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        let now = Instant::now();

        tracker.on_event(&ActivityEvent::partial("Hel", 0.9), now, &mut sched);
        tracker.on_event(&ActivityEvent::partial("Hello there", 0.9), now, &mut sched);

        assert_eq!(tracker.accumulated_text(), "Hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn finals_commit_and_clear_the_preview() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        let now = Instant::now();

        tracker.on_event(&ActivityEvent::partial("I want", 0.9), now, &mut sched);
        tracker.on_event(&ActivityEvent::final_text("I want to", 0.9), now, &mut sched);
        tracker.on_event(&ActivityEvent::partial("go to", 0.9), now, &mut sched);
        assert_eq!(tracker.accumulated_text(), "I want to go to");

        tracker.on_event(&ActivityEvent::final_text("go to the store", 0.9), now, &mut sched);
        assert_eq!(tracker.accumulated_text(), "I want to go to the store");
        assert_eq!(tracker.turn().unwrap().word_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_partial_still_rearms_and_keeps_text() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        let t0 = Instant::now();

        let (_, first) = tracker.on_event(&ActivityEvent::partial("yes", 0.9), t0, &mut sched);
        let t1 = t0 + Duration::from_millis(300);
        let (outcome, second) = tracker.on_event(&ActivityEvent::partial("", 0.1), t1, &mut sched);

        assert!(!outcome.started_turn);
        assert_ne!(first.token, second.token);
        assert_eq!(second.stage1_at, t1 + Duration::from_millis(500));
        assert!(!sched.is_live(first.token));
        assert_eq!(tracker.last_activity_at(), Some(t1));
        assert_eq!(tracker.accumulated_text(), "yes");
    }

    #[tokio::test(start_paused = true)]
    async fn first_event_opens_turn_and_bumps_epoch() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        assert_eq!(tracker.epoch(), 0);

        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("hi", 0.9), Instant::now(), &mut sched);
        assert!(outcome.started_turn);
        assert_eq!(outcome.epoch, 1);

        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("hi there", 0.9), Instant::now(), &mut sched);
        assert!(!outcome.started_turn);
        assert_eq!(outcome.epoch, 1);

        tracker.end_turn();
        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("again", 0.9), Instant::now(), &mut sched);
        assert!(outcome.started_turn);
        assert_eq!(outcome.epoch, 2);
    }

    #[test]
    fn advance_epoch_updates_live_turn() {
        let mut tracker = ActivityTracker::new();
        tracker.turn = Some(ConversationTurn::new(1, Instant::now()));
        tracker.epoch = 1;

        assert_eq!(tracker.advance_epoch(), 2);
        assert_eq!(tracker.turn().unwrap().epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_after_interruption_reuses_the_fresh_epoch() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        tracker.on_event(&ActivityEvent::partial("one", 0.9), Instant::now(), &mut sched);

        // Interruption order: advance while the turn is alive, then end it.
        assert_eq!(tracker.advance_epoch(), 2);
        tracker.end_turn();

        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("two", 0.9), Instant::now(), &mut sched);
        assert!(outcome.started_turn);
        assert_eq!(outcome.epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_surviving_an_advance_claims_the_new_epoch() {
        let (mut sched, _rx) = scheduler();
        let mut tracker = ActivityTracker::new();
        tracker.on_event(&ActivityEvent::partial("one", 0.9), Instant::now(), &mut sched);

        assert_eq!(tracker.advance_epoch(), 2);
        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("one more", 0.9), Instant::now(), &mut sched);
        assert!(!outcome.started_turn);
        assert_eq!(outcome.epoch, 2);

        tracker.end_turn();
        let (outcome, _) =
            tracker.on_event(&ActivityEvent::partial("two", 0.9), Instant::now(), &mut sched);
        assert!(outcome.started_turn);
        assert_eq!(outcome.epoch, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_measures_speech_from_turn_start() {
        let mut timing = CascadeTimingConfig::default();
        timing.confirmation.enabled = true;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sched = CascadeScheduler::new(timing, tx);
        let mut tracker = ActivityTracker::new();
        let t0 = Instant::now();

        let long = "one two three four five six seven";
        tracker.on_event(&ActivityEvent::partial(long, 0.9), t0, &mut sched);
        // Enough words, but still under the minimum spoken time.
        let t1 = t0 + Duration::from_millis(1000);
        let (_, s) = tracker.on_event(&ActivityEvent::partial(long, 0.9), t1, &mut sched);
        assert_eq!(s.stage1_at, t1 + Duration::from_millis(500 + 800));

        let t2 = t0 + Duration::from_millis(2000);
        let (_, s) = tracker.on_event(&ActivityEvent::partial(long, 0.9), t2, &mut sched);
        assert_eq!(s.stage1_at, t2 + Duration::from_millis(500));
    }
}
