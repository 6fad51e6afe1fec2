//! Core alarm notification pipeline: dedup/gating, channel fan-out, the
//! dead-letter queue and its reprocessor, system state, the worker
//! registry, the optional LISTEN/NOTIFY side channel, and the narrow admin
//! surface that ties them together for an external operator tool to call.

pub mod adapters;
pub mod admin;
pub mod consumer;
pub mod dedup;
pub mod dlq;
pub mod listener;
pub mod processor;
pub mod state;
pub mod workers;
