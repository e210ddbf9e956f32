use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use chrono::Local;

use dmr_core::{
    dispatch::{DispatchSummary, ProgressReporter, SendResult, SendRound},
    domain::{Destination, InboundEvent},
};

use crate::render;

/// Prints dispatcher progress to stdout.
pub struct ConsoleReporter {
    sends_per_round: usize,
    delay: Duration,
    current_round: AtomicU64,
    sent_in_round: AtomicUsize,
}

impl ConsoleReporter {
    pub fn new(sends_per_round: usize, delay: Duration) -> Self {
        Self {
            sends_per_round,
            delay,
            current_round: AtomicU64::new(0),
            sent_in_round: AtomicUsize::new(0),
        }
    }

    /// Position of the next send within `round` (1-based), printing the
    /// round header on the first send of a round.
    fn next_index(&self, round: u64) -> usize {
        if self.current_round.swap(round, Ordering::SeqCst) != round {
            self.sent_in_round.store(0, Ordering::SeqCst);
            println!("\n{}\n", render::round_header(round, &Local::now()));
        }
        self.sent_in_round.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ProgressReporter for ConsoleReporter {
    fn connected(&self, username: &str, destinations: &[Destination]) {
        println!(
            "Connected as {username}; sending to {} destination(s). Press Ctrl+C to stop.",
            destinations.len()
        );
    }

    fn send_result(&self, round: u64, result: &SendResult) {
        let index = self.next_index(round);
        println!("{}", render::send_line(index, self.sends_per_round, result));
        if index < self.sends_per_round && !self.delay.is_zero() {
            println!("      {}", render::waiting_line(self.delay, "before the next send"));
        }
    }

    fn round_complete(&self, round: &SendRound) {
        println!("\n{}", render::round_summary(round));
        if !self.delay.is_zero() {
            println!("{}", render::waiting_line(self.delay, "before the next round"));
        }
    }

    fn inbound(&self, event: &InboundEvent) {
        println!("{}", render::inbound_line(event));
    }

    fn stopped(&self, summary: &DispatchSummary) {
        println!("\n{}", render::stop_summary(summary));
    }
}
