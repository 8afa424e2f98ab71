//! Shared application state.

#![allow(missing_docs)]

use slotvote_common::config::LiveConfig;
use slotvote_core::VoteService;

use crate::presence::LiveRegistry;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub vote_service: VoteService,
    /// Presence rooms; also the vote service's publisher.
    pub live: LiveRegistry,
    pub live_config: LiveConfig,
}
