//! AIS to Cursor on Target gateway
//!
//! Ingests AIS from radio receivers, polled aggregators and streaming
//! services, merges it into per-vessel state, and emits CoT events.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod cot;
pub mod decoder;
pub mod errors;
pub mod feeds;
pub mod known_craft;
pub mod mapper;
pub mod models;
pub mod registry;
pub mod synthesizer;
pub mod transport;
