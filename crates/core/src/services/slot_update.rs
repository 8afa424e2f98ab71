//! Slot counter updates pushed to live viewers.
//!
//! Core publishes through [`SlotUpdatePublisher`] so it never depends on the
//! WebSocket layer; the presence registry in `slotvote-api` implements it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Booking counter for one option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCount {
    /// Number of `yes` votes on the option.
    pub current_count: u64,
    /// Capacity limit, `None` for unlimited.
    pub max_capacity: Option<i32>,
}

/// Counters keyed by option ID.
pub type SlotUpdates = BTreeMap<String, SlotCount>;

/// Fan-out of committed poll changes to connected viewers.
///
/// Publishing is best-effort: implementations must not fail the caller,
/// whose vote is already committed.
#[async_trait]
pub trait SlotUpdatePublisher: Send + Sync {
    /// Push fresh slot counters to every viewer of `poll_token`.
    async fn publish_slot_update(&self, poll_token: &str, updates: &SlotUpdates);

    /// Tell viewers of `poll_token` that results changed and should be reloaded.
    async fn publish_results_refresh(&self, poll_token: &str);
}
