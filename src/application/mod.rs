//! Application layer: use cases wired against the domain ports.

pub mod engine;
pub mod policies;
pub mod query;
pub mod scope;
