//! Internal utilities.
//!
//! Kept dependency-free so the descriptor store has no allocation behavior
//! beyond what the standard collections do.

pub mod arena;

pub use arena::{Arena, ArenaIndex};
