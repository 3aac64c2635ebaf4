//! # Domain Layer
//!
//! Pin modes and the persisted pin snapshot, the tri-color marking set
//! used by the collector, and the error types.

pub mod coloring;
pub mod entities;
pub mod errors;

pub use coloring::{ColoredSet, Strictness};
pub use entities::{pin_key, PinMode, PinSets, Pinned, PIN_DATASTORE_KEY};
pub use errors::{GcError, GcResult, PinError};
