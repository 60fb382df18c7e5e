//! Shared domain types for the vigil monitoring backend.
//!
//! Everything here is plain data: metric values and their type tags,
//! severity and comparison enums, incident subjects, and probe outcomes.
//! The crates that do I/O (`vigil-storage`, `vigil-server`) depend on
//! these types; this crate depends on nothing but serde and chrono.

pub mod id;
pub mod types;
