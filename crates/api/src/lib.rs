//! HTTP and realtime layer for slotvote.
//!
//! - **Endpoints**: vote submission, bulk survey submission, withdrawal and
//!   slot counters under `/api/polls/{token}`
//! - **Presence**: in-memory rooms of live viewers per poll token
//! - **Streaming**: the WebSocket protocol driving those rooms
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod middleware;
pub mod presence;
pub mod response;
pub mod streaming;

pub use endpoints::router;
pub use presence::{LiveRegistry, PresenceSnapshot};
pub use streaming::{ClientMessage, LiveSession, ServerMessage, live_handler};
