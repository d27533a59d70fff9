//! till-core: shared types, config schema, and error types for the till sync subsystem

pub mod config;
pub mod error;
pub mod types;

pub use error::{TillError, TillResult};
pub use types::{EntityPayload, EntityType, OperationKind, Record};
