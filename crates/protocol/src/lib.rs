//! A2A protocol: JSON-RPC 2.0 envelope, message/task wire types, agent card,
//! and the platform's reserved metadata keys.
//!
//! Tasks are the externally visible handles over runs; messages carry parts
//! (text, data, error) whose unknown kinds round-trip without loss.

mod card;
mod message;
mod metadata;
#[path = "methods.rs"]
mod methods_impl;
mod rpc;
mod task;

pub use card::*;
pub use message::*;
pub use metadata::*;
pub use methods_impl::*;
pub use rpc::*;
pub use task::*;

/// A2A protocol version advertised on the agent card.
pub const PROTOCOL_VERSION: &str = "0.3.0";
