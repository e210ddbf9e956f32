use std::collections::VecDeque;

use chrono::{DateTime, Local};

use crate::domain::{Destination, InboundEvent};

pub const INBOUND_HISTORY_CAPACITY: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed(String),
}

/// One send of one message to one destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendResult {
    pub destination: String,
    pub text: String,
    pub outcome: SendOutcome,
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, SendOutcome::Sent)
    }
}

/// One pass over the send plan.
#[derive(Clone, Debug)]
pub struct SendRound {
    pub round: u64,
    pub started_at: DateTime<Local>,
    pub results: Vec<SendResult>,
    pub round_sent: u64,
    pub round_failed: u64,
    pub total_sent: u64,
    pub total_failed: u64,
}

impl SendRound {
    pub fn new(round: u64, started_at: DateTime<Local>, total_sent: u64, total_failed: u64) -> Self {
        Self {
            round,
            started_at,
            results: Vec::new(),
            round_sent: 0,
            round_failed: 0,
            total_sent,
            total_failed,
        }
    }

    pub fn record(&mut self, result: SendResult) {
        if result.is_sent() {
            self.round_sent += 1;
            self.total_sent += 1;
        } else {
            self.round_failed += 1;
            self.total_failed += 1;
        }
        self.results.push(result);
    }
}

/// Bounded buffer of the most recent inbound events.
#[derive(Clone, Debug)]
pub struct InboundHistory {
    cap: usize,
    events: VecDeque<InboundEvent>,
}

impl Default for InboundHistory {
    fn default() -> Self {
        Self::new(INBOUND_HISTORY_CAPACITY)
    }
}

impl InboundHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            events: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ev: InboundEvent) {
        if self.events.len() == self.cap {
            self.events.pop_front();
        }
        self.events.push_back(ev);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first.
    pub fn into_vec(self) -> Vec<InboundEvent> {
        self.events.into()
    }
}

#[derive(Clone, Debug, Default)]
pub struct DispatchSummary {
    pub rounds: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub inbound_received: u64,
    pub recent_inbound: Vec<InboundEvent>,
}

/// Sink for dispatcher progress.
///
/// Called from the send loop and from the inbound reporter task; must not block.
pub trait ProgressReporter: Send + Sync {
    fn connected(&self, _username: &str, _destinations: &[Destination]) {}

    fn send_result(&self, _round: u64, _result: &SendResult) {}

    fn round_complete(&self, _round: &SendRound) {}

    fn inbound(&self, _event: &InboundEvent) {}

    fn stopped(&self, _summary: &DispatchSummary) {}
}

/// Reporter that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}
