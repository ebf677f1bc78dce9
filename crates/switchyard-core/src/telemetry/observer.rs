//! Observer-side telemetry client
//!
//! Connects to a [`TelemetryServer`](super::TelemetryServer) as a
//! WebSocket client and forwards received envelopes on a channel.
//! Reconnection is this side's responsibility: on disconnect the client
//! retries with capped exponential backoff,
//! `delay = min(base × 2^attempt, cap)`, and the attempt counter resets
//! after every successful connect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::envelope::{self, Envelope};

/// Observer connection settings
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Telemetry endpoint, e.g. `ws://127.0.0.1:9400`
    pub url: String,
    /// First reconnect delay, in milliseconds
    pub reconnect_base_ms: u64,
    /// Upper bound on the reconnect delay, in milliseconds
    pub reconnect_cap_ms: u64,
    /// Capacity of the channel events are forwarded on
    pub channel_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9400".to_string(),
            reconnect_base_ms: 250,
            reconnect_cap_ms: 30_000,
            channel_capacity: 256,
        }
    }
}

/// Start an observer. Spawns the reconnect loop in the background and
/// returns the receiving end of the event channel. The loop stops when
/// the receiver is dropped.
pub fn start(config: ObserverConfig) -> mpsc::Receiver<Envelope> {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    tokio::spawn(reconnect_loop(config, tx));
    rx
}

/// Reconnect delay for the given attempt: `min(base × 2^attempt, cap)`
pub fn backoff_delay(base_ms: u64, cap_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

async fn reconnect_loop(config: ObserverConfig, tx: mpsc::Sender<Envelope>) {
    let mut attempt: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("telemetry observer connected to {}", config.url);
                attempt = 0;

                let (mut write, mut read) = ws_stream.split();
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => {
                            match envelope::from_bytes(text.as_bytes()) {
                                Ok(env) => {
                                    if tx.send(env).await.is_err() {
                                        // Consumer gone; stop for good.
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!("discarding malformed telemetry frame: {}", e);
                                }
                            }
                        }
                        Ok(WsMessage::Ping(data)) => {
                            let _ = write.send(WsMessage::Pong(data)).await;
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("telemetry stream closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("telemetry read error: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("telemetry connect to {} failed: {}", config.url, e);
            }
        }

        if tx.is_closed() {
            return;
        }

        let delay = backoff_delay(config.reconnect_base_ms, config.reconnect_cap_ms, attempt);
        info!("telemetry observer reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
