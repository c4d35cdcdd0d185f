//! Core types and constants for the Orrery engine.
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Frame slot arithmetic for the frames-in-flight ring
//! - Scene object identifiers and their allocator
//! - The engine-wide error type for non-GPU failures

pub mod error;
pub mod slot;
pub mod types;

pub use error::{Error, Result};
pub use slot::{next_slot, previous_slot};
pub use types::{IdAllocator, ObjectId};

/// Engine-wide constants
pub mod constants {
    /// Number of frames whose GPU work may be in flight at once.
    pub const FRAMES_IN_FLIGHT: usize = 2;
    /// Timeout used for fence waits and image acquisition.
    pub const NO_TIMEOUT: u64 = u64::MAX;
}
