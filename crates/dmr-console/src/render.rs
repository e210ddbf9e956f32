//! Operator-facing text. Everything here returns strings; printing happens in
//! the reporter and the flows.

use std::time::Duration;

use dmr_core::{
    auth::BatchResult,
    dispatch::{DispatchSummary, SendOutcome, SendResult, SendRound},
    domain::{Destination, InboundEvent},
    utils::{clock_time, preview},
};

pub const INBOUND_PREVIEW_CHARS: usize = 40;
pub const OUTBOUND_PREVIEW_CHARS: usize = 50;

const RULE_WIDTH: usize = 60;

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

pub fn destination_line(d: &Destination) -> String {
    format!(
        "  {}. {} ({} users)",
        d.position,
        d.display_name(),
        d.participant_count
    )
}

pub fn destination_list(inbox: &[Destination]) -> String {
    inbox
        .iter()
        .map(destination_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn selection_summary(selected: &[Destination]) -> String {
    let mut out = format!("Selected {} destination(s):", selected.len());
    for (i, d) in selected.iter().enumerate() {
        out.push_str(&format!("\n  {}. {}", i + 1, d.display_name()));
    }
    out
}

pub fn inbound_line(ev: &InboundEvent) -> String {
    format!(
        "[IN #{}] {} from {}: {}",
        ev.seq,
        clock_time(&ev.received_at),
        ev.sender.0,
        preview(&ev.text, INBOUND_PREVIEW_CHARS)
    )
}

pub fn round_header(round: u64, started: &chrono::DateTime<chrono::Local>) -> String {
    format!("{}\nROUND #{round} - {}\n{}", rule(), clock_time(started), rule())
}

pub fn send_line(index: usize, of: usize, result: &SendResult) -> String {
    let status = match &result.outcome {
        SendOutcome::Sent => "sent".to_string(),
        SendOutcome::Failed(e) => format!("FAILED: {e}"),
    };
    format!(
        "[{index}/{of}] {} <- {}\n      {status}",
        result.destination,
        preview(&result.text, OUTBOUND_PREVIEW_CHARS)
    )
}

pub fn round_summary(round: &SendRound) -> String {
    format!(
        "Round #{} summary: sent {} / failed {} (total sent {}, total failed {})",
        round.round, round.round_sent, round.round_failed, round.total_sent, round.total_failed
    )
}

pub fn stop_summary(summary: &DispatchSummary) -> String {
    format!(
        "Stopped after {} round(s): {} sent, {} failed, {} inbound message(s)",
        summary.rounds, summary.total_sent, summary.total_failed, summary.inbound_received
    )
}

pub fn waiting_line(delay: Duration, what: &str) -> String {
    format!("Waiting {}s {what}...", delay.as_secs())
}

pub fn batch_summary(results: &[BatchResult]) -> String {
    let ok = results.iter().filter(|r| r.is_success()).count();
    let mut out = format!("Logged in {ok}/{} account(s)", results.len());
    for r in results {
        let label = if r.description.trim().is_empty() {
            r.username.clone()
        } else {
            format!("{} ({})", r.username, r.description)
        };
        match &r.outcome {
            Ok(_) => out.push_str(&format!("\n  ok      {label}")),
            Err(e) => out.push_str(&format!("\n  failed  {label}: {e}")),
        }
    }
    out
}
