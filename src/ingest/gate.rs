// src/ingest/gate.rs
//! Render-flush gate: at most one flush per interval, newest batch wins,
//! and a pending batch is never dropped.
//!
//! States and transitions:
//! - `Idle` + offer, interval elapsed: flush now, stay `Idle`.
//! - `Idle` + offer, inside interval: become `Pending { due = last + interval }`.
//! - `Pending` + offer: replace the batch, keep `due`.
//! - `Pending` + poll at or after `due`: flush, back to `Idle`.
//! - `drain`: hand out whatever is pending, back to `Idle`.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum GateState<T> {
    Idle,
    Pending { batch: T, due: Instant },
}

#[derive(Debug)]
pub struct RenderGate<T> {
    interval: Duration,
    last_flush: Option<Instant>,
    state: GateState<T>,
}

impl<T> RenderGate<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
            state: GateState::Idle,
        }
    }

    pub fn state(&self) -> &GateState<T> {
        &self.state
    }

    /// When the pending batch becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            GateState::Idle => None,
            GateState::Pending { due, .. } => Some(*due),
        }
    }

    /// Offer a newer batch. Returns it when it may be flushed immediately.
    pub fn offer(&mut self, batch: T, now: Instant) -> Option<T> {
        let due = match self.last_flush {
            Some(last) if now.saturating_duration_since(last) < self.interval => last + self.interval,
            _ => {
                self.state = GateState::Idle;
                self.last_flush = Some(now);
                return Some(batch);
            }
        };
        // An older pending batch is superseded; its deadline is kept.
        let due = match &self.state {
            GateState::Pending { due: existing, .. } => *existing,
            GateState::Idle => due,
        };
        self.state = GateState::Pending { batch, due };
        None
    }

    /// Flush the pending batch if its deadline has passed.
    pub fn poll_due(&mut self, now: Instant) -> Option<T> {
        match &self.state {
            GateState::Pending { due, .. } if now >= *due => self.take(now),
            _ => None,
        }
    }

    /// Take the pending batch regardless of its deadline.
    pub fn drain(&mut self, now: Instant) -> Option<T> {
        self.take(now)
    }

    fn take(&mut self, now: Instant) -> Option<T> {
        match std::mem::replace(&mut self.state, GateState::Idle) {
            GateState::Pending { batch, .. } => {
                self.last_flush = Some(now);
                Some(batch)
            }
            GateState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test(start_paused = true)]
    async fn first_offer_flushes_and_later_ones_wait() {
        let mut gate = RenderGate::new(100 * MS);
        let t0 = Instant::now();
        assert_eq!(gate.offer(1, t0), Some(1));
        assert_eq!(gate.offer(2, t0 + 30 * MS), None);
        assert_eq!(gate.deadline(), Some(t0 + 100 * MS));

        // superseded by a newer batch, same deadline
        assert_eq!(gate.offer(3, t0 + 60 * MS), None);
        assert_eq!(gate.deadline(), Some(t0 + 100 * MS));

        assert_eq!(gate.poll_due(t0 + 99 * MS), None);
        assert_eq!(gate.poll_due(t0 + 100 * MS), Some(3));
        assert_eq!(gate.state(), &GateState::Idle);

        assert_eq!(gate.offer(4, t0 + 250 * MS), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_hands_out_pending_batch() {
        let mut gate = RenderGate::new(100 * MS);
        let t0 = Instant::now();
        gate.offer("a", t0);
        gate.offer("b", t0 + 10 * MS);
        assert_eq!(gate.drain(t0 + 20 * MS), Some("b"));
        assert_eq!(gate.drain(t0 + 20 * MS), None);
    }
}
