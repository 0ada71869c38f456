//! Shared kernel - common types used across bounded contexts

pub mod error;
pub mod result;
pub mod value_objects;
