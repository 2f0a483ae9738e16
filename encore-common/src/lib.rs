//! # Encore Common Library
//!
//! Shared code for Encore crates:
//! - Error type used by persistence and configuration
//! - Event types (`EncoreEvent`) and the broadcast `EventBus`
//! - Configuration loading and root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
