//! Core deterministic primitives.
//!
//! Everything in this module is a pure function of its inputs. Game outcomes
//! derived from these helpers replay identically on every platform.

pub mod hash;
pub mod rng;

// Re-export core types
pub use hash::{compute_state_hash, StateHash, StateHasher};
pub use rng::{roll_deterministic, DeterministicRng};
