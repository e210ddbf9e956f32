use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::DestinationId,
    errors::Error,
    platform::{client::RealtimeConnection, types::MessageHandler},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends on the connection.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same destination.
    pub per_destination_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::ZERO,
            per_destination_min_interval: Duration::from_millis(1000),
        }
    }
}

impl ThrottleConfig {
    pub fn is_disabled(&self) -> bool {
        self.global_min_interval.is_zero() && self.per_destination_min_interval.is_zero()
    }
}

/// Earliest time the next send of one stream may go out.
#[derive(Debug)]
struct SendSlot {
    spacing: Duration,
    free_at: Option<Instant>,
}

impl SendSlot {
    fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            free_at: None,
        }
    }

    /// Claim the first slot at or after `now` and return when it opens.
    fn claim(&mut self, now: Instant) -> Instant {
        let at = self.free_at.map_or(now, |t| t.max(now));
        self.free_at = Some(at + self.spacing);
        at
    }
}

#[derive(Debug)]
struct Slots {
    global: SendSlot,
    per_destination: HashMap<DestinationId, SendSlot>,
}

/// RealtimeConnection decorator that spaces out outbound sends.
///
/// The operator's inter-send delay paces the loop; this is a floor underneath it
/// so a zero delay cannot flood one conversation. Waiting for a slot ends early
/// with `Error::Cancelled` once `cancel` fires.
pub struct ThrottledConnection {
    inner: Arc<dyn RealtimeConnection>,
    cfg: ThrottleConfig,
    slots: Mutex<Slots>,
    cancel: CancellationToken,
}

impl ThrottledConnection {
    pub fn new(
        inner: Arc<dyn RealtimeConnection>,
        cfg: ThrottleConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            cfg,
            slots: Mutex::new(Slots {
                global: SendSlot::new(cfg.global_min_interval),
                per_destination: HashMap::new(),
            }),
            cancel,
        }
    }

    /// Wrap `inner` unless throttling is disabled.
    pub fn wrap(
        inner: Arc<dyn RealtimeConnection>,
        cfg: ThrottleConfig,
        cancel: CancellationToken,
    ) -> Arc<dyn RealtimeConnection> {
        if cfg.is_disabled() {
            inner
        } else {
            Arc::new(Self::new(inner, cfg, cancel))
        }
    }

    /// When the next send to `destination` may go out; claims that slot.
    fn claim(&self, destination: &DestinationId) -> Instant {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let global_at = slots.global.claim(now);
        let spacing = self.cfg.per_destination_min_interval;
        let dest_at = slots
            .per_destination
            .entry(destination.clone())
            .or_insert_with(|| SendSlot::new(spacing))
            .claim(now);
        global_at.max(dest_at)
    }

    async fn wait_for_slot(&self, destination: &DestinationId) -> Result<()> {
        let at = self.claim(destination);
        if at <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
          _ = self.cancel.cancelled() => Err(Error::Cancelled),
          _ = sleep_until(at) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RealtimeConnection for ThrottledConnection {
    async fn send_text(&self, destination: &DestinationId, text: &str) -> Result<()> {
        self.wait_for_slot(destination).await?;
        self.inner.send_text(destination, text).await
    }

    fn on_message(&self, handler: MessageHandler) {
        self.inner.on_message(handler);
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
