//! WebSocket delivery of the telemetry stream

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::TelemetryBroadcaster;

/// Serves the telemetry stream to WebSocket observers.
///
/// Each connection gets its own subscription on the broadcaster: the
/// bounded recent history first, then live events as JSON text frames
/// in publish order. A dropped connection releases its subscription
/// immediately; reconnection is the observer's responsibility.
pub struct TelemetryServer {
    broadcaster: Arc<TelemetryBroadcaster>,
    shutdown: watch::Sender<bool>,
}

impl TelemetryServer {
    pub fn new(broadcaster: Arc<TelemetryBroadcaster>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            broadcaster,
            shutdown,
        }
    }

    /// Bind and start accepting observers. Returns the bound address
    /// (useful with a `:0` port).
    pub async fn start(&self, bind_addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Telemetry(format!("failed to bind {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Telemetry(e.to_string()))?;

        info!("telemetry listening on ws://{}", local_addr);

        let broadcaster = Arc::clone(&self.broadcaster);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("telemetry server stopping");
                            break;
                        }
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let broadcaster = Arc::clone(&broadcaster);
                                let conn_shutdown = shutdown_rx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        handle_observer(stream, addr, broadcaster, conn_shutdown).await
                                    {
                                        warn!("observer {} disconnected: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("telemetry accept error: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop the server: the accept loop exits and live observer
    /// connections are closed
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_observer(
    stream: TcpStream,
    addr: SocketAddr,
    broadcaster: Arc<TelemetryBroadcaster>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::Telemetry(format!("handshake failed: {}", e)))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Subscription lives for the connection; dropping it on return
    // releases this observer's queue.
    let mut handle = broadcaster.subscribe();
    info!("telemetry observer connected from {}", addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = handle.next() => {
                match event {
                    Some(envelope) => {
                        let json = serde_json::to_string(&envelope)?;
                        if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        return Err(Error::Telemetry(e.to_string()));
                    }
                    _ => {} // Text, Binary, Pong, Frame from observers are ignored
                }
            }
        }
    }

    info!("telemetry observer {} detached", addr);
    Ok(())
}
