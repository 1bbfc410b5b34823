//! Persistence layer: the dead-letter sink for undeliverable events.
//!
//! Only permanently failed deliveries are stored. The file is append-only
//! JSON Lines and is never read back by this crate.

pub mod dead_letter;
pub mod models;

pub use dead_letter::DeadLetterSink;
pub use models::{DEAD_LETTER_SCHEMA_VERSION, DeadLetterEntry};
