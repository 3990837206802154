//! Receiver side: watch a receiver's collection and surface the newest image.

use crate::error::{RelayError, RelayResult};
use crate::identity::ReceiverIdentity;
use crate::image_selector::{decide, SelectionDecision};
use crate::models::{receiver_images_path, IncomingImage};
use crate::realtime_db::{RealtimeDatabase, Subscription};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// What a receiver session delivers on its channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Newest record of a delivered snapshot
    Image(IncomingImage),
    /// The subscription ended on its own (server cancel, revoked auth, broken
    /// stream). Nothing more arrives for `receiver_id` until the session
    /// listens again. Not sent after `stop_listening`.
    Closed {
        receiver_id: ReceiverIdentity,
        reason: String,
    },
}

struct ActiveSubscription {
    receiver_id: ReceiverIdentity,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// A receiver session holding at most one live subscription.
///
/// Every non-empty snapshot delivered while listening produces one
/// [`ReceiverEvent::Image`] on the session's channel, carrying the newest
/// record. Redelivered snapshots are surfaced again.
pub struct ReceiverSession {
    database: Arc<dyn RealtimeDatabase>,
    events: mpsc::UnboundedSender<ReceiverEvent>,
    active: Option<ActiveSubscription>,
}

impl ReceiverSession {
    /// Create an idle session and the channel its events arrive on
    pub fn new(database: Arc<dyn RealtimeDatabase>) -> (Self, mpsc::UnboundedReceiver<ReceiverEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        (
            Self {
                database,
                events,
                active: None,
            },
            receiver,
        )
    }

    /// Start watching `receiver_id`, replacing any current subscription
    #[instrument(skip(self), fields(receiver_id = %receiver_id))]
    pub async fn start_listening(&mut self, receiver_id: &ReceiverIdentity) -> RelayResult<()> {
        self.stop_listening().await;

        let path = receiver_images_path(receiver_id);
        let subscription = self
            .database
            .subscribe(&path)
            .await
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_snapshots(
            receiver_id.clone(),
            subscription,
            cancel.clone(),
            self.events.clone(),
        ));

        self.active = Some(ActiveSubscription {
            receiver_id: receiver_id.clone(),
            cancel,
            task,
        });

        info!(path = %path, "Listening for images");

        Ok(())
    }

    /// Stop watching. No events are emitted once this returns; a no-op when idle.
    pub async fn stop_listening(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();

        if let Err(e) = active.task.await {
            warn!(error = %e, "Subscription task ended abnormally");
        }

        info!(receiver_id = %active.receiver_id, "Stopped listening");
    }

    /// False once the subscription has been stopped or has ended on its own
    pub fn is_listening(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveSubscription::is_live)
    }

    /// Receiver currently watched, if any
    pub fn active_receiver(&self) -> Option<&ReceiverIdentity> {
        self.active
            .as_ref()
            .filter(|a| a.is_live())
            .map(|a| &a.receiver_id)
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

async fn watch_snapshots(
    receiver_id: ReceiverIdentity,
    mut subscription: Subscription,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ReceiverEvent>,
) {
    let path = subscription.path().to_string();
    let mut last_error = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = subscription.next() => match next {
                Some(Ok(snapshot)) => {
                    metrics::counter!("relay.snapshots.received").increment(1);

                    match decide(&snapshot) {
                        SelectionDecision::Surface(entry) => {
                            let incoming = IncomingImage {
                                receiver_id: receiver_id.clone(),
                                key: entry.key.clone(),
                                url: entry.record.url.clone(),
                                timestamp: entry.record.timestamp,
                                sender: entry.record.sender.clone(),
                            };

                            debug!(
                                key = %incoming.key,
                                timestamp = incoming.timestamp,
                                records = snapshot.len(),
                                "Surfacing most recent image"
                            );
                            metrics::counter!("relay.images.surfaced").increment(1);

                            if events.send(ReceiverEvent::Image(incoming)).is_err() {
                                debug!("Event receiver dropped");
                                break;
                            }
                        }
                        SelectionDecision::Skip { reason } => {
                            trace!(reason, "Nothing to surface");
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(receiver_id = %receiver_id, error = %e, "Subscription error");
                    last_error = Some(e.to_string());
                }
                None => {
                    info!(path = %path, "Subscription stream ended");
                    metrics::counter!("relay.subscriptions.closed").increment(1);

                    let _ = events.send(ReceiverEvent::Closed {
                        receiver_id: receiver_id.clone(),
                        reason: last_error.unwrap_or_else(|| "Subscription stream ended".to_string()),
                    });
                    break;
                }
            }
        }
    }

    subscription.unsubscribe();
}
