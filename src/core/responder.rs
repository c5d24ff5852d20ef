//! Automatic replies to inbound data
//!
//! Every enabled item is checked against each inbound chunk. Matching
//! items queue their response, which is sent after the item's delay.

use super::protocol::FrameParameters;
use super::router::Subscription;
use super::session::SessionHandle;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// When an item replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOption {
    /// Send the inbound chunk back unchanged
    Echo,
    /// Reply to every chunk
    Always,
    /// Reply when the chunk equals the reference
    #[default]
    InputEqualReference,
    /// Reply when the chunk contains the reference
    InputContainsReference,
    /// Reply when the chunk does not contain the reference
    InputDoesNotContainReference,
}

impl ResponseOption {
    /// Every option
    pub fn all() -> &'static [ResponseOption] {
        &[
            Self::Echo,
            Self::Always,
            Self::InputEqualReference,
            Self::InputContainsReference,
            Self::InputDoesNotContainReference,
        ]
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// One reply rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderItem {
    /// Disabled items never reply
    pub enabled: bool,
    /// Display name
    pub description: String,
    /// Matching rule
    pub option: ResponseOption,
    /// Delay between the inbound chunk and the reply
    pub delay_ms: u64,
    /// Bytes the inbound chunk is compared with
    pub reference: FrameParameters,
    /// Reply frame
    pub response: FrameParameters,
}

impl Default for ResponderItem {
    fn default() -> Self {
        Self {
            enabled: true,
            description: "Demo".to_string(),
            option: ResponseOption::default(),
            delay_ms: 1000,
            reference: FrameParameters::default(),
            response: FrameParameters::default(),
        }
    }
}

impl ResponderItem {
    /// Enabled item replying with `response` without delay
    pub fn new(option: ResponseOption, reference: FrameParameters, response: FrameParameters) -> Self {
        Self {
            option,
            delay_ms: 0,
            reference,
            response,
            ..Self::default()
        }
    }

    /// Set the reply delay
    #[must_use]
    pub fn delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Reply to `input`, or `None` when this item does not fire
    pub fn respond(&self, input: &[u8]) -> Option<Bytes> {
        if !self.enabled || input.is_empty() {
            return None;
        }

        let reference = || self.reference.to_bytes();
        let fires = match self.option {
            ResponseOption::Echo => return Some(Bytes::copy_from_slice(input)),
            ResponseOption::Always => true,
            ResponseOption::InputEqualReference => input == &reference()[..],
            ResponseOption::InputContainsReference => contains(input, &reference()),
            ResponseOption::InputDoesNotContainReference => !contains(input, &reference()),
        };
        fires.then(|| self.response.to_bytes())
    }
}

/// Responder rule set
#[derive(Debug, Clone, Default)]
pub struct Responder {
    items: Vec<ResponderItem>,
}

impl Responder {
    /// Responder over `items`
    pub fn new(items: Vec<ResponderItem>) -> Self {
        Self { items }
    }

    /// Configured items
    pub fn items(&self) -> &[ResponderItem] {
        &self.items
    }

    /// Replies for one inbound chunk, each with its delay, in item order
    pub fn responses_for(&self, input: &[u8]) -> Vec<(Duration, Bytes)> {
        self.items
            .iter()
            .filter_map(|item| {
                item.respond(input)
                    .filter(|reply| !reply.is_empty())
                    .map(|reply| (Duration::from_millis(item.delay_ms), reply))
            })
            .collect()
    }

    /// Answer chunks from `inbound` through `handle` until `cancel` fires.
    ///
    /// Pending delayed replies are dropped on cancellation.
    pub fn spawn(
        self,
        mut inbound: Subscription,
        handle: SessionHandle,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut delayed = JoinSet::new();
            info!(items = self.items.len(), "responder started");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    chunk = inbound.recv() => {
                        let Some(chunk) = chunk else { break };
                        for (delay, reply) in self.responses_for(&chunk) {
                            debug!(len = reply.len(), delay_ms = delay.as_millis() as u64, "queueing response");
                            if delay.is_zero() {
                                handle.input_bytes(reply);
                            } else {
                                let handle = handle.clone();
                                delayed.spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    handle.input_bytes(reply);
                                });
                            }
                        }
                    }
                    Some(_) = delayed.join_next(), if !delayed.is_empty() => {}
                }
            }

            delayed.abort_all();
            info!("responder stopped");
        })
    }
}
