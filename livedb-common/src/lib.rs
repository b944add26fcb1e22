//! # LiveDB Common Library
//!
//! Shared code for the LiveDB service crates:
//! - Database bootstrap and row models
//! - Event types (LiveDbEvent) and the EventBus
//! - Configuration loading
//! - Error and Result types

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod status;

pub use error::{Error, Result};
pub use status::StatusRecord;
