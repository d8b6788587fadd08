//! The Loop Core
//!
//! Thought cycle, context management, tool handling, and the worker
//! task that ties them together.

pub mod context;
pub mod cycle;
pub mod engine_loop;
pub mod seed;
pub mod tools;

pub use engine_loop::Engine;

/// Sentinel handed to a waiting caller when no reply could be produced.
pub const NO_RESPONSE: &str = "(no response)";
