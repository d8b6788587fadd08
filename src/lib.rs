//! Autoloop -- Self-Feeding Thought Engine
//!
//! A perpetual text-generation loop against a local completion server:
//! model output is appended back into its own prompt, embedded tool
//! markers trigger side effects, and the context is periodically
//! compressed to stay bounded.

pub mod types;
pub mod config;
pub mod generate;
pub mod engine;
pub mod logging;
