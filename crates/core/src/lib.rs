//! Core business logic for slotvote.
//!
//! - [`BookingService`]: the transactional booking engine (single and bulk)
//! - [`VoteService`]: pre-booking checks and post-commit broadcasts
//! - [`SlotUpdatePublisher`]: seam to the realtime layer

pub mod services;

pub use services::*;
