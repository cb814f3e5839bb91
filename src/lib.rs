//! Remote agents drive debug sessions through tool calls.
//!
//! A [`server::Server`] accepts JSON-RPC tool calls over HTTP, the [`tools::Tools`] dispatcher
//! runs them one at a time against a [`engine::DebugEngine`], and the
//! [`session::SessionRegistry`] mirrors the engine's (possibly nested) debug sessions.

pub mod breakpoint;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod serializer;
pub mod server;
pub mod session;
pub mod tools;
pub mod tracer;

pub use error::{Error, Result};
