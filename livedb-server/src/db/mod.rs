//! Database access layer
//!
//! Plain async query functions over the LiveDB tables. Functions taking a
//! `&mut SqliteConnection` run inside the caller's transaction; functions
//! taking a pool run standalone.

pub mod model_sets;
pub mod queue;
pub mod sequences;
pub mod settings;
pub mod values;
