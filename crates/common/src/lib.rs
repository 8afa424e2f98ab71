//! Common utilities and shared types for slotvote.
//!
//! This crate provides foundational components used across all slotvote crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based vote IDs and edit tokens via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use slotvote_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("Listening on {}:{}, next vote {}", config.server.host, config.server.port, id_gen.generate());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
