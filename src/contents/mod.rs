//! Content-addressed content storage.
//!
//! Payloads (serialized table metadata) are stored by their SHA-256 hash.
//! Content is write-once: identical payloads always map to the same hash
//! and are stored only once.

mod store;

pub use store::ContentStore;
