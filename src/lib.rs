//! # keyq
//!
//! Per-key serialized work queue for chat relays.
//!
//! Events for one identity are processed one at a time, in arrival order;
//! different identities proceed in parallel. Redelivered events are dropped
//! by a dedup window and failed items are retried with bounded backoff.
//! The [`relay`] module plugs an LLM completion and an outbound channel into
//! the engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
pub mod relay;
pub mod telemetry;
