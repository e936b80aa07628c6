//! Shaman gateway: the A2A server personas, JSON-RPC + SSE transport,
//! run/step scheduler, and the agent execution loop.

pub mod api;
pub mod rpc;
pub mod runtime;
pub mod state;
