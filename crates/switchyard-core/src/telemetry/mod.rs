//! Real-time telemetry fan-out
//!
//! Every routing decision and learning update is published to the
//! [`TelemetryBroadcaster`], which fans events out to any number of
//! observers. Delivery is at-most-once and best-effort:
//!
//! - the publish path never blocks beyond enqueueing,
//! - each observer that falls behind loses its own oldest events and
//!   nothing else; a slow observer cannot cost a fast one an event,
//! - newly attached observers receive a bounded backlog of the most
//!   recent events, then the live stream.
//!
//! [`TelemetryServer`] exposes the stream over WebSocket; the
//! [`observer`] module provides the client side with capped exponential
//! reconnect backoff.

mod broadcaster;
pub mod observer;
mod server;

pub use broadcaster::{ObserverHandle, TelemetryBroadcaster, DEFAULT_HISTORY_LIMIT};
pub use observer::ObserverConfig;
pub use server::TelemetryServer;
