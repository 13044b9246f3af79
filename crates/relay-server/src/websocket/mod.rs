//! WebSocket connection handling, admission, membership, routing, and fan-out.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `peer` | Per-connection handle: identity, source address, outbound queue |
//! | `admission` | Origin / IP / per-address cap checks |
//! | `membership` | Shared per-address counters and per-form member sets |
//! | `envelope` | Inbound frame parsing |
//! | `router` | Per-connection protocol state machine |
//! | `broadcast` | Fan-out to form members with eviction of dead peers |
//! | `heartbeat` | Keep-alive ping with bounded wait |
//! | `session` | Socket read/write loops and unconditional unwind |
//!
//! ## Data Flow
//!
//! `session` → `admission` → `router` (per frame) → `membership` + `broadcast` → peers.

pub mod admission;
pub mod broadcast;
pub mod envelope;
pub mod heartbeat;
pub mod membership;
pub mod peer;
pub mod router;
pub mod session;
