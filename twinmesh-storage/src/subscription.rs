//! Change-log subscriptions
//!
//! A [`ChangeSubscription`] is a background task that follows one
//! collection's change log from a cursor and yields the entries as an async
//! stream. Read failures are retried forever with capped exponential backoff,
//! resuming from the last delivered sequence number, so a subscriber sees
//! every entry at least once and in log order.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use twinmesh_core::{ChangeCursor, ChangeEntry, StoreError};

use crate::config::MirrorConfig;
use crate::store::StoreRef;

/// Item yielded by a [`ChangeSubscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Change(ChangeEntry),
    /// The cursor fell behind the pruned part of the log. The subscription
    /// continues after `head`; the consumer must rebuild its state from a
    /// full scan taken no earlier than this event.
    Resync { head: u64 },
}

/// Live subscription to one collection's change log.
pub struct ChangeSubscription {
    events: mpsc::Receiver<SubscriptionEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChangeSubscription {
    /// Start following `store` from `cursor`.
    pub fn spawn(store: StoreRef, cursor: ChangeCursor, config: MirrorConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.batch_size.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(follow(store, cursor, config, tx, shutdown_rx));
        Self {
            events: rx,
            shutdown,
            task,
        }
    }

    /// Next event, or `None` once the subscription has stopped.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        self.events.close();
        let _ = (&mut self.task).await;
    }
}

impl Stream for ChangeSubscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Wait for `duration`, returning early on shutdown.
async fn pause(duration: std::time::Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.changed() => {}
    }
}

async fn follow(
    store: StoreRef,
    cursor: ChangeCursor,
    config: MirrorConfig,
    tx: mpsc::Sender<SubscriptionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let collection = store.category().collection_name();
    let mut signal = store.change_signal();
    let mut backoff = config.reconnect_initial_backoff;

    // "now" has to be pinned to a sequence number before the first read,
    // otherwise entries appended between reads would be skipped.
    let mut position = loop {
        if *shutdown.borrow() || tx.is_closed() {
            return;
        }
        match cursor {
            ChangeCursor::Now => match store.head().await {
                Ok(head) => break head,
                Err(e) => {
                    tracing::warn!(collection, error = %e, "Failed to resolve change-log head");
                    pause(backoff, &mut shutdown).await;
                    backoff = config.next_backoff(backoff);
                }
            },
            other => break other.resolve(0),
        }
    };

    tracing::debug!(collection, position, "Change subscription started");

    loop {
        if *shutdown.borrow() || tx.is_closed() {
            break;
        }

        let _ = signal.borrow_and_update();
        match store
            .changes_since(ChangeCursor::After(position), config.batch_size)
            .await
        {
            Ok(batch) if batch.is_empty() => {
                backoff = config.reconnect_initial_backoff;
                tracing::trace!(collection, position, "Change log idle");
                tokio::select! {
                    changed = signal.changed() => {
                        if changed.is_err() {
                            tokio::time::sleep(config.idle_poll_interval).await;
                        }
                    }
                    _ = tokio::time::sleep(config.idle_poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Ok(batch) => {
                backoff = config.reconnect_initial_backoff;
                for entry in batch.entries {
                    let seq = entry.seq;
                    if tx.send(SubscriptionEvent::Change(entry)).await.is_err() {
                        return;
                    }
                    position = seq;
                }
            }
            Err(StoreError::CursorExpired { oldest, .. }) => {
                match store.head().await {
                    Ok(head) => {
                        tracing::warn!(
                            collection,
                            position,
                            oldest,
                            head,
                            "Change cursor expired, requesting resync"
                        );
                        if tx.send(SubscriptionEvent::Resync { head }).await.is_err() {
                            return;
                        }
                        position = head;
                    }
                    Err(e) => {
                        tracing::warn!(collection, error = %e, "Failed to resolve change-log head");
                        pause(backoff, &mut shutdown).await;
                        backoff = config.next_backoff(backoff);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    collection,
                    position,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Change-log read failed, reconnecting"
                );
                pause(backoff, &mut shutdown).await;
                backoff = config.next_backoff(backoff);
            }
        }
    }

    tracing::debug!(collection, position, "Change subscription stopped");
}
