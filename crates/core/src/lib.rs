//! Shared building blocks for the event store crates.
//!
//! Identifiers and the usage-error model. No infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{CoreError, CoreResult};
pub use id::AggregateId;
