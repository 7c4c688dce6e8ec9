//! Immutable, content-addressed commit storage.
//!
//! A commit's id is the SHA-256 of its canonical MessagePack encoding
//! (parent, depth, metadata, mutations). Parents are fixed before the id is
//! computed, so the parent graph can never contain a cycle.

mod store;

pub use store::{CommitStore, ParentChain};
