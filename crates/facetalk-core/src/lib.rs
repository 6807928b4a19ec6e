//! Shared types, errors, configuration, wire protocol, and the per-user
//! conversation store.

pub mod config;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{FacetalkError, Result};
