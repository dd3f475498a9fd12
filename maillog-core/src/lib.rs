//! maillog core library: event types, the durable event buffer, formatting.
//!
//! Public API surface:
//! - [`types`]: [`Event`] and [`Level`]
//! - [`error`]: [`BufferError`]
//! - [`buffer`]: [`EventBuffer`], the persisted pending-event store
//! - [`format`]: plain-text summary rendering

pub mod buffer;
pub mod error;
pub mod format;
pub mod types;

pub use buffer::EventBuffer;
pub use error::BufferError;
pub use types::{Event, Level};
