//! Periodic frame emitter
//!
//! Each item accumulates elapsed time on every tick and is sent once its
//! interval is reached, after which its timer starts over. Disabled items
//! do not accumulate time.

use super::protocol::FrameParameters;
use super::session::SessionHandle;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tick period of the emitter loop
pub const EMITTER_TICK: Duration = Duration::from_millis(25);

/// One periodically sent frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterItem {
    /// Disabled items are skipped and keep their timer
    pub enabled: bool,
    /// Display name
    pub description: String,
    /// Send period
    pub interval_ms: u64,
    /// Frame to send
    pub frame: FrameParameters,
}

impl Default for EmitterItem {
    fn default() -> Self {
        Self {
            enabled: true,
            description: "Demo".to_string(),
            interval_ms: 1000,
            frame: FrameParameters::default(),
        }
    }
}

impl EmitterItem {
    /// Enabled item sending `frame` every `interval_ms`
    pub fn new(description: &str, interval_ms: u64, frame: FrameParameters) -> Self {
        Self {
            enabled: true,
            description: description.to_string(),
            interval_ms,
            frame,
        }
    }
}

/// Emitter items plus their running timers
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    items: Vec<EmitterItem>,
    elapsed: Vec<u64>,
}

impl Emitter {
    /// Emitter over `items`, all timers at zero
    pub fn new(items: Vec<EmitterItem>) -> Self {
        let elapsed = vec![0; items.len()];
        Self { items, elapsed }
    }

    /// Configured items
    pub fn items(&self) -> &[EmitterItem] {
        &self.items
    }

    /// Advance every enabled item by `elapsed_ms` and return the indices
    /// of the items that are due, resetting their timers.
    pub fn tick(&mut self, elapsed_ms: u64) -> Vec<usize> {
        let mut due = Vec::new();
        for (index, (item, elapsed)) in self.items.iter().zip(self.elapsed.iter_mut()).enumerate() {
            if !item.enabled {
                continue;
            }
            *elapsed = elapsed.saturating_add(elapsed_ms);
            if *elapsed >= item.interval_ms {
                *elapsed = 0;
                due.push(index);
            }
        }
        due
    }

    /// Zero every timer
    pub fn reset(&mut self) {
        self.elapsed.iter_mut().for_each(|e| *e = 0);
    }

    /// Run the emitter against `handle` until `cancel` fires
    pub fn spawn(mut self, handle: SessionHandle, cancel: CancellationToken) -> JoinHandle<Self> {
        tokio::spawn(async move {
            let step = EMITTER_TICK.as_millis() as u64;
            let mut ticker = tokio::time::interval(EMITTER_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset();
            info!(items = self.items.len(), "emitter started");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for index in self.tick(step) {
                            let item = &self.items[index];
                            debug!(index, description = %item.description, "emitting");
                            handle.send_frame(&item.frame);
                        }
                    }
                }
            }

            info!("emitter stopped");
            self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::TextFormat;
    use crate::core::session::DeviceSession;
    use crate::core::transport::testing::loopback_registry;
    use crate::core::transport::TransportConfig;

    fn item(text: &str, interval_ms: u64) -> EmitterItem {
        EmitterItem::new(text, interval_ms, FrameParameters::new(text, TextFormat::Utf8))
    }

    #[test]
    fn test_tick_accumulates_and_resets() {
        let mut emitter = Emitter::new(vec![item("a", 100), item("b", 250)]);
        let mut fired = Vec::new();
        for step in 1..=12 {
            for index in emitter.tick(25) {
                fired.push((step * 25, index));
            }
        }
        assert_eq!(fired, vec![(100, 0), (200, 0), (250, 1), (300, 0)]);
    }

    #[test]
    fn test_disabled_items_do_not_accumulate() {
        let mut disabled = item("x", 50);
        disabled.enabled = false;
        let mut emitter = Emitter::new(vec![disabled]);
        assert!(emitter.tick(1000).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut emitter = Emitter::new(vec![item("a", 100)]);
        emitter.tick(75);
        emitter.reset();
        assert!(emitter.tick(75).is_empty());
        assert_eq!(emitter.tick(25), vec![0]);
    }

    #[test]
    fn test_item_defaults() {
        let item: EmitterItem = toml::from_str("description = \"x\"").unwrap();
        assert!(item.enabled);
        assert_eq!(item.interval_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_sends_frames() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        let mut written = session.written_router().subscribe("test");
        session.open_device().await.unwrap();

        let cancel = CancellationToken::new();
        let task = Emitter::new(vec![item("a", 100), item("b", 250)])
            .spawn(session.handle(), cancel.clone());

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(written.recv().await.unwrap());
        }
        assert_eq!(seen, vec!["a", "a", "b", "a"]);

        cancel.cancel();
        let emitter = task.await.unwrap();
        assert_eq!(emitter.items().len(), 2);
        session.close_device().await;
    }
}
