//! Shared domain types for the Pivot analysis client.

pub mod board;
pub mod config;
pub mod events;
pub mod failure;
pub mod game;
pub mod job;
pub mod report;

mod errors;

pub use errors::{PivotError, Result};
