//! Completion Endpoint Client
//!
//! Talks to an external OpenAI-compatible server. The engine only ever
//! sees the `CompletionClient` trait from `types`.

pub mod client;

pub use client::HttpCompletionClient;
