//! # relay-server
//!
//! Real-time form relay over axum `WebSocket`s.
//!
//! Clients connect, authenticate every envelope with a shared token, name a
//! form (channel), and receive every message other members of that form send.
//!
//! - `websocket::admission`: origin / IP / per-address cap checks before the message loop
//! - `websocket::membership`: per-address counters and per-form member sets behind one lock
//! - `websocket::router`: per-connection protocol state machine
//! - `websocket::broadcast`: verbatim fan-out with detect-on-write eviction
//! - `websocket::session`: socket read/write loops, heartbeat, unconditional unwind
//! - `server`: axum routes (`/`, `/ws`, `/health`, `/metrics`) and listener

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
