//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync core:
//! - Logging and tracing infrastructure
//! - Configuration management and reconnect policy
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the other core crates
//! depend on. It establishes the logging conventions, the builder that wires
//! host bridges into the core, and the broadcast bus used to surface channel
//! and cache lifecycle events.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{Backoff, CoreConfig, CoreConfigBuilder, Environment, ReconnectPolicy};
pub use error::{Error, Result};
pub use events::{CacheEvent, ConnectionState, CoreEvent, EventBus, RealtimeEvent};
