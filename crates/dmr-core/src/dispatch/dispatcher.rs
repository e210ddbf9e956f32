use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Local;
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{Destination, DestinationId, InboundEvent, Session},
    errors::Error,
    platform::{PlatformClient, RawMessage, Subscriptions, ThrottleConfig, ThrottledConnection},
    Result,
};

use super::{
    payload::Payload,
    report::{DispatchSummary, InboundHistory, ProgressReporter, SendOutcome, SendResult, SendRound},
};

/// One planned send.
#[derive(Clone, Debug)]
struct PlannedSend {
    destination: DestinationId,
    name: String,
    text: String,
}

/// Order of sends within one round.
///
/// Line mode: for each line, every destination. Single mode: every destination once.
fn build_plan(destinations: &[Destination], payload: &Payload) -> Vec<PlannedSend> {
    payload
        .messages()
        .iter()
        .flat_map(|text| {
            destinations.iter().map(move |d| PlannedSend {
                destination: d.id.clone(),
                name: d.display_name(),
                text: text.clone(),
            })
        })
        .collect()
}

/// Sleep for `d` unless cancelled first. Returns true when cancelled.
async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> bool {
    if d.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
      _ = cancel.cancelled() => true,
      _ = sleep(d) => false,
    }
}

/// Realtime message dispatcher: repeatedly sends a payload to a set of
/// destinations over one connection while surfacing inbound messages.
pub struct Dispatcher {
    client: Arc<dyn PlatformClient>,
    reporter: Arc<dyn ProgressReporter>,
    subscriptions: Subscriptions,
    throttle: ThrottleConfig,
    /// Inbox listing handed to `connect`; the selected destinations when empty.
    inbox: Vec<Destination>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn PlatformClient>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            client,
            reporter,
            subscriptions: Subscriptions::default(),
            throttle: ThrottleConfig::default(),
            inbox: Vec::new(),
        }
    }

    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Subscriptions) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Full inbox snapshot the realtime connection subscribes with.
    pub fn with_inbox(mut self, inbox: Vec<Destination>) -> Self {
        self.inbox = inbox;
        self
    }

    /// Send `payload` to `destinations` round after round until `cancel` fires.
    ///
    /// Per-send failures are counted and reported; only precondition and
    /// connection failures end the run with an error.
    pub async fn run_infinite_send(
        &self,
        session: &Session,
        destinations: &[Destination],
        payload: &Payload,
        delay: Duration,
        cancel: CancellationToken,
    ) -> Result<DispatchSummary> {
        if !session.is_valid {
            return Err(Error::Validation(format!(
                "session for {} is not valid; authenticate first",
                session.username
            )));
        }
        if destinations.is_empty() {
            return Err(Error::Validation("no destinations selected".to_string()));
        }
        if payload.is_empty() {
            return Err(Error::Validation("message payload is empty".to_string()));
        }

        let inbox = if self.inbox.is_empty() {
            destinations
        } else {
            self.inbox.as_slice()
        };
        let conn = self
            .client
            .connect(session, &self.subscriptions, inbox)
            .await
            .map_err(|e| Error::Connect {
                username: session.username.clone(),
                message: e.to_string(),
            })?;
        let conn = ThrottledConnection::wrap(conn, self.throttle, cancel.clone());
        if self.throttle.per_destination_min_interval > delay && !self.throttle.is_disabled() {
            info!(
                floor_ms = self.throttle.per_destination_min_interval.as_millis() as u64,
                "sends to one conversation are spaced by the per-destination floor"
            );
        }
        info!(
            username = %session.username,
            destinations = destinations.len(),
            "realtime connection established"
        );
        self.reporter.connected(&session.username, destinations);

        // Inbound side: sequence + forward, never block the transport reader.
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
        let seq = Arc::new(AtomicU64::new(0));
        {
            let seq = seq.clone();
            conn.on_message(Arc::new(move |raw: RawMessage| {
                let Some(text) = raw.text_body() else {
                    return;
                };
                let ev = InboundEvent {
                    seq: seq.fetch_add(1, Ordering::SeqCst) + 1,
                    sender: raw.from.clone(),
                    text: text.to_string(),
                    received_at: Local::now(),
                };
                let _ = tx.send(ev);
            }));
        }

        let inbound_done = CancellationToken::new();
        let inbound_task = {
            let reporter = self.reporter.clone();
            let done = inbound_done.clone();
            tokio::spawn(async move {
                let mut history = InboundHistory::default();
                loop {
                    tokio::select! {
                      ev = rx.recv() => match ev {
                          Some(ev) => {
                              reporter.inbound(&ev);
                              history.push(ev);
                          }
                          None => break,
                      },
                      _ = done.cancelled() => {
                          while let Ok(ev) = rx.try_recv() {
                              reporter.inbound(&ev);
                              history.push(ev);
                          }
                          break;
                      }
                    }
                }
                history
            })
        };

        // Outbound side.
        let plan = build_plan(destinations, payload);
        let mut round_no = 0u64;
        let mut total_sent = 0u64;
        let mut total_failed = 0u64;

        'rounds: while !cancel.is_cancelled() {
            round_no += 1;
            let mut round = SendRound::new(round_no, Local::now(), total_sent, total_failed);
            debug!(round = round_no, sends = plan.len(), "round started");

            for (i, item) in plan.iter().enumerate() {
                if cancel.is_cancelled() {
                    total_sent = round.total_sent;
                    total_failed = round.total_failed;
                    break 'rounds;
                }

                let outcome = match conn.send_text(&item.destination, &item.text).await {
                    Ok(()) => SendOutcome::Sent,
                    // Stopped while waiting for a throttle slot; nothing went out.
                    Err(Error::Cancelled) => {
                        total_sent = round.total_sent;
                        total_failed = round.total_failed;
                        break 'rounds;
                    }
                    Err(e) => {
                        let err = Error::Send {
                            destination: item.name.clone(),
                            message: e.to_string(),
                        };
                        warn!(round = round_no, "{err}");
                        SendOutcome::Failed(e.to_string())
                    }
                };
                let result = SendResult {
                    destination: item.name.clone(),
                    text: item.text.clone(),
                    outcome,
                };
                self.reporter.send_result(round_no, &result);
                round.record(result);

                if i + 1 < plan.len() && sleep_or_cancel(delay, &cancel).await {
                    total_sent = round.total_sent;
                    total_failed = round.total_failed;
                    break 'rounds;
                }
            }

            total_sent = round.total_sent;
            total_failed = round.total_failed;
            info!(
                round = round_no,
                sent = round.round_sent,
                failed = round.round_failed,
                total_sent,
                total_failed,
                "round complete"
            );
            self.reporter.round_complete(&round);

            if sleep_or_cancel(delay, &cancel).await {
                break;
            }
            if delay.is_zero() {
                // Let the inbound task and the canceller run between rounds.
                tokio::task::yield_now().await;
            }
        }

        inbound_done.cancel();
        let history = match inbound_task.await {
            Ok(h) => h,
            Err(e) => {
                warn!("inbound reporter task failed: {e}");
                InboundHistory::default()
            }
        };
        if let Err(e) = conn.close().await {
            warn!(username = %session.username, "closing realtime connection: {e}");
        }

        let summary = DispatchSummary {
            rounds: round_no,
            total_sent,
            total_failed,
            inbound_received: seq.load(Ordering::SeqCst),
            recent_inbound: history.into_vec(),
        };
        info!(
            rounds = summary.rounds,
            total_sent, total_failed, "dispatcher stopped"
        );
        self.reporter.stopped(&summary);
        Ok(summary)
    }
}
