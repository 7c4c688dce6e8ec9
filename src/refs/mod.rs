//! Named references (branches and tags).
//!
//! A reference is the only mutable thing in the store. Every update is an
//! optimistic compare-and-swap against the head the caller last observed;
//! the manager never retries on its own.

mod manager;

pub use manager::{validate_reference_name, ReferenceManager, DEFAULT_BRANCH};
