//! Shared domain types for the Shaman orchestration platform: entities,
//! configuration surfaces, provider-agnostic chat/stream types, and the
//! workspace-wide error type.

pub mod chat;
pub mod config;
pub mod error;
pub mod message;
pub mod run;
pub mod rundata;
pub mod step;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
