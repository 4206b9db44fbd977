//! Customer discovery interview simulator.
//!
//! Generates synthetic customer personas for a product context, runs an
//! interviewer/persona dialogue with each of them in parallel and condenses
//! what they said into ranked themes. All model access goes through the
//! [`brain::TextGenerator`] trait.

pub mod analyst;
pub mod api;
pub mod brain;
pub mod config;
pub mod error;
pub mod extract;
pub mod interviewer;
pub mod manager;
pub mod persona_generator;
pub mod reporter;
pub mod simulation;

#[cfg(test)]
mod test_support;

pub use error::{DiscoveryError, Result};
