//! Change notifications for external listeners.
//!
//! Follows every collection from "now" and republishes each change as a
//! [`ChangeNotification`] on a broadcast channel. Upserts carry the record's
//! current payload; deletes carry none. Slow receivers lag and lose the
//! oldest notifications, the stores are unaffected.

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use twinmesh_core::{ChangeCursor, ChangeNotification, RecordCategory};

use crate::config::MirrorConfig;
use crate::store::{StoreRef, Stores};
use crate::subscription::{ChangeSubscription, SubscriptionEvent};

pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeNotification>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl ChangeNotifier {
    pub fn start(stores: &Stores, config: MirrorConfig) -> Self {
        Self::with_capacity(stores, config, DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(stores: &Stores, config: MirrorConfig, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for (category, store) in stores.iter() {
            let subscription =
                ChangeSubscription::spawn(store.clone(), ChangeCursor::Now, config.clone());
            tasks.spawn(forward(
                category,
                store.clone(),
                subscription,
                sender.clone(),
                shutdown.subscribe(),
            ));
        }

        Self {
            sender,
            shutdown,
            tasks,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn forward(
    category: RecordCategory,
    store: StoreRef,
    mut subscription: ChangeSubscription,
    sender: broadcast::Sender<ChangeNotification>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = subscription.next_event() => event,
            _ = shutdown.changed() => None,
        };
        let entry = match event {
            Some(SubscriptionEvent::Change(entry)) => entry,
            // Missed entries cannot be reconstructed for listeners.
            Some(SubscriptionEvent::Resync { head }) => {
                tracing::warn!(collection = %category, head, "Notifications skipped after cursor expiry");
                continue;
            }
            None => break,
        };

        let payload = if entry.kind.is_upsert() {
            match store.get(&entry.id).await {
                Ok(record) => record.map(|record| record.payload),
                Err(e) => {
                    tracing::warn!(
                        collection = %category,
                        id = %entry.id,
                        error = %e,
                        "Failed to load payload for notification"
                    );
                    None
                }
            }
        } else {
            None
        };

        // No receivers is not an error.
        let _ = sender.send(ChangeNotification {
            category,
            id: entry.id,
            kind: entry.kind,
            payload,
        });
    }
    subscription.stop().await;
}
