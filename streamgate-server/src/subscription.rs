use futures::{Stream, StreamExt};
use metrics::{counter, gauge};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use streamgate_core::{
    subject, DeliverFrom, Engine, EntryStream, LogEntry, SubscribeRequest,
};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::gateway_metrics::{ACTIVE_SUBSCRIPTIONS, SUBSCRIPTION_MESSAGES_OUT_TOTAL};

/// Lifecycle of a single live subscription.
///
/// `Initializing -> Streaming -> Draining -> Closed`, with a failed initialization going
/// straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionState {
    Initializing,
    Streaming,
    Draining,
    Closed,
}

/// Why a streaming subscription stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Cancelled,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) struct SubscriptionSettings {
    /// Entries buffered between the engine cursor and the client
    pub(crate) channel_capacity: usize,
    /// How long an in-flight delivery may take once the client has gone away
    pub(crate) drain_grace: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        SubscriptionSettings {
            channel_capacity: 16,
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// SubscriptionBridge turns an engine consumer into a per-client stream of entries.
///
/// Each subscription is served by one spawned task that owns the engine cursor for its
/// whole life, so the cursor is released exactly once whichever way the subscription
/// ends.
#[derive(Clone)]
pub(crate) struct SubscriptionBridge {
    engine: Arc<dyn Engine>,
    settings: SubscriptionSettings,
}

impl SubscriptionBridge {
    pub(crate) fn new(engine: Arc<dyn Engine>, settings: SubscriptionSettings) -> Self {
        SubscriptionBridge { engine, settings }
    }

    pub(crate) fn subscribe(&self, request: SubscribeRequest) -> Subscription {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Initializing);
        let cancel = CancellationToken::new();

        let pump = Pump {
            log: request.log_name.clone(),
            tx,
            state: state_tx,
            cancel: cancel.clone(),
            drain_grace: self.settings.drain_grace,
            last_delivered: None,
        };
        tokio::spawn(pump.run(Arc::clone(&self.engine), request));

        Subscription {
            events: ReceiverStream::new(rx),
            state: state_rx,
            cancel: cancel.clone(),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

/// Client side of a live subscription. Yields entries in log order and, if the
/// subscription fails, one final error. Dropping it cancels the subscription.
pub(crate) struct Subscription {
    events: ReceiverStream<Result<LogEntry>>,
    state: watch::Receiver<SubscriptionState>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl Subscription {
    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Resolves once the subscription has left `Initializing`. From then on every entry
    /// appended to the log is delivered.
    pub(crate) fn ready(&self) -> impl Future<Output = SubscriptionState> + Send + 'static {
        let mut state = self.state.clone();
        async move {
            match state
                .wait_for(|state| *state != SubscriptionState::Initializing)
                .await
            {
                Ok(current) => *current,
                Err(_) => SubscriptionState::Closed,
            }
        }
    }

    #[allow(dead_code)]
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    #[allow(dead_code)]
    pub(crate) fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }
}

impl Stream for Subscription {
    type Item = Result<LogEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Counts the subscription in the active gauge for as long as it lives.
struct ActiveGuard {
    log: String,
}

impl ActiveGuard {
    fn new(log: &str) -> Self {
        gauge!(ACTIVE_SUBSCRIPTIONS.name, "log" => log.to_string()).increment(1.0);
        ActiveGuard {
            log: log.to_string(),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        gauge!(ACTIVE_SUBSCRIPTIONS.name, "log" => self.log.clone()).decrement(1.0);
    }
}

struct Pump {
    log: String,
    tx: mpsc::Sender<Result<LogEntry>>,
    state: watch::Sender<SubscriptionState>,
    cancel: CancellationToken,
    drain_grace: Duration,
    last_delivered: Option<u64>,
}

impl Pump {
    async fn run(mut self, engine: Arc<dyn Engine>, request: SubscribeRequest) {
        let _active = ActiveGuard::new(&self.log);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            opened = open_cursor(engine.as_ref(), &request) => Some(opened),
        };

        match opened {
            None => debug!(log = %self.log, "subscription cancelled while initializing"),
            Some(Err(err)) => {
                warn!(log = %self.log, error = %err, "subscription failed to initialize");
                self.send_terminal(err).await;
            }
            Some(Ok(mut cursor)) => {
                self.transition(SubscriptionState::Streaming);
                let reason = self.stream(&mut cursor).await;
                self.transition(SubscriptionState::Draining);
                // Releases the engine consumer
                drop(cursor);
                debug!(
                    log = %self.log,
                    reason = ?reason,
                    last_delivered = ?self.last_delivered,
                    "subscription cursor released"
                );
            }
        }

        self.transition(SubscriptionState::Closed);
    }

    async fn stream(&mut self, cursor: &mut EntryStream) -> CloseReason {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return CloseReason::Cancelled,
                _ = self.tx.closed() => return CloseReason::Disconnected,
                next = cursor.next() => next,
            };

            match next {
                Some(Ok(entry)) => {
                    // An entry at or below the last delivered sequence was already sent
                    if self.last_delivered.is_some_and(|last| entry.sequence <= last) {
                        continue;
                    }
                    if let Some(reason) = self.deliver(entry).await {
                        return reason;
                    }
                }
                Some(Err(err)) => {
                    let err = GatewayError::from(err);
                    warn!(log = %self.log, error = %err, "subscription terminated by engine");
                    self.transition(SubscriptionState::Draining);
                    self.send_terminal(err).await;
                    return CloseReason::Failed;
                }
                None => {
                    let err = GatewayError::EngineUnavailable(format!(
                        "consumer on log {} closed by the engine",
                        self.log
                    ));
                    warn!(log = %self.log, "subscription consumer ended");
                    self.transition(SubscriptionState::Draining);
                    self.send_terminal(err).await;
                    return CloseReason::Failed;
                }
            }
        }
    }

    /// Hand one entry to the client. Returns why the subscription must stop, if it must.
    async fn deliver(&mut self, entry: LogEntry) -> Option<CloseReason> {
        let sequence = entry.sequence;
        // Permits borrow the sender they came from, so reserve on a handle of our own
        let tx = self.tx.clone();

        let reserved = tokio::select! {
            biased;
            permit = tx.reserve() => Some(permit),
            _ = self.cancel.cancelled() => None,
        };

        match reserved {
            Some(Ok(permit)) => {
                permit.send(Ok(entry));
                self.delivered(sequence);
                None
            }
            Some(Err(_)) => Some(CloseReason::Disconnected),
            None => {
                // The entry is already in flight; give it the grace period to land
                self.transition(SubscriptionState::Draining);
                let landed = match timeout(self.drain_grace, tx.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(Ok(entry));
                        true
                    }
                    _ => false,
                };
                if landed {
                    self.delivered(sequence);
                } else {
                    debug!(log = %self.log, sequence, "in-flight entry dropped on cancel");
                }
                Some(CloseReason::Cancelled)
            }
        }
    }

    fn delivered(&mut self, sequence: u64) {
        self.last_delivered = Some(sequence);
        counter!(SUBSCRIPTION_MESSAGES_OUT_TOTAL.name, "log" => self.log.clone()).increment(1);
    }

    /// Deliver the one terminal error event, bounded by the drain grace period.
    async fn send_terminal(&self, err: GatewayError) {
        if timeout(self.drain_grace, self.tx.send(Err(err)))
            .await
            .is_err()
        {
            debug!(log = %self.log, "terminal error not delivered within grace period");
        }
    }

    fn transition(&self, next: SubscriptionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(log = %self.log, from = ?previous, to = ?next, "subscription state changed");
        }
    }
}

/// Validate the request and create the engine consumer it describes.
async fn open_cursor(engine: &dyn Engine, request: &SubscribeRequest) -> Result<EntryStream> {
    if request.log_name.is_empty() {
        return Err(GatewayError::Validation("log name must not be empty".into()));
    }
    if let Some(pattern) = &request.subject_filter {
        if !subject::is_valid_filter(pattern) {
            return Err(GatewayError::Validation(format!(
                "invalid subject filter: {}",
                pattern
            )));
        }
    }
    let from = match request.resume {
        Some(0) => {
            return Err(GatewayError::Validation(
                "resume sequence must be at least 1".into(),
            ))
        }
        Some(sequence) => DeliverFrom::Sequence(sequence),
        None => DeliverFrom::New,
    };

    engine.log_info(&request.log_name).await?;
    let cursor = engine
        .create_consumer(&request.log_name, request.subject_filter.as_deref(), from)
        .await?;
    Ok(cursor)
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod subscription_test;
