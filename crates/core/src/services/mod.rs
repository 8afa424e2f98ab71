//! Business logic services.

#![allow(missing_docs)]

pub mod advisory_lock;
pub mod booking;
pub mod identity;
pub mod slot_update;
pub mod voting;

pub use booking::{BookingService, BulkBooking, BulkVoteItem, BulkVoteRequest, VoteRequest};
pub use identity::VoterIdentity;
pub use slot_update::{SlotCount, SlotUpdatePublisher, SlotUpdates};
pub use voting::{SubmitVotesInput, VoteItem, VoteService};
