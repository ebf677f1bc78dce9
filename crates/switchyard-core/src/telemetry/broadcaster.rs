//! Bounded broadcast of telemetry envelopes

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use tokio::sync::broadcast;
use tracing::warn;

use crate::envelope::Envelope;

/// Events replayed to a newly attached observer
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Per-observer live queue capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for telemetry envelopes.
///
/// Backed by a broadcast channel: each observer reads at its own pace
/// from a bounded ring, and an observer that lags simply skips its own
/// oldest events. Publication never blocks and never fails.
pub struct TelemetryBroadcaster {
    sender: broadcast::Sender<Envelope>,
    // Guards both the history ring and subscription, so an observer's
    // backlog and live stream line up without gap or overlap.
    history: StdMutex<VecDeque<Envelope>>,
    history_limit: usize,
}

/// An attached observer: the recent-history backlog plus the live feed
pub struct ObserverHandle {
    backlog: VecDeque<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
}

impl TelemetryBroadcaster {
    /// Create a broadcaster with default capacities
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_LIMIT)
    }

    /// Create a broadcaster with explicit queue capacity and history size
    pub fn with_limits(channel_capacity: usize, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            history: StdMutex::new(VecDeque::with_capacity(history_limit)),
            history_limit,
        }
    }

    /// Publish an envelope to all observers. Never blocks beyond
    /// enqueueing; having no observers is not an error.
    pub fn publish(&self, envelope: Envelope) {
        let mut history = lock(&self.history);
        history.push_back(envelope.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }
        // Err means no receivers are currently attached.
        let _ = self.sender.send(envelope);
    }

    /// Attach a new observer. It receives the bounded recent history,
    /// then every event published after attachment.
    pub fn subscribe(&self) -> ObserverHandle {
        let history = lock(&self.history);
        let receiver = self.sender.subscribe();
        ObserverHandle {
            backlog: history.clone(),
            receiver,
        }
    }

    /// Number of currently attached observers
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TelemetryBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverHandle {
    /// Next event, backlog first, then the live stream. Returns `None`
    /// once the broadcaster is dropped and the stream is drained. A lag
    /// (this observer's own queue overflowed) is logged and skipped.
    pub async fn next(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagged, dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next)
    pub fn try_next(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagged, dropped oldest events");
                }
                Err(_) => return None,
            }
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
