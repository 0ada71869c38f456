//! Domain layer - call records, the store port, and the signaling engine

pub mod call;
pub mod shared;
pub mod signaling;
