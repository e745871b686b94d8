//! Domain layer: value objects, entities, command payloads, and the ports
//! the application layer is written against.

pub mod escrow;
pub mod milestone;
pub mod money;
pub mod note;
pub mod patch;
pub mod policy;
pub mod ports;
pub mod scope;
