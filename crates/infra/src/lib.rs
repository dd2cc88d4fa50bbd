//! Infrastructure layer: event store, projector state, replay and dispatch.

pub mod config;
pub mod event_store;
pub mod projector;

#[cfg(test)]
mod integration_tests;
