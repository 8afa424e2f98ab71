//! Repository layer for read access outside of booking transactions.

pub mod poll;
pub mod user;
pub mod vote;

pub use poll::PollRepository;
pub use user::UserRepository;
pub use vote::VoteRepository;
