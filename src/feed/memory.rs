use super::{ChangeEvent, ChangeFeed, ChangeKind, ChangeStream, ChannelId, FeedError, Table};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct FeedInner {
    subscribers: RwLock<HashMap<(Table, ChannelId), mpsc::UnboundedSender<ChangeEvent>>>,
    rejected_tables: RwLock<HashSet<Table>>,
    sequence: AtomicU64,
}

/// In-process change broker
///
/// Clones share the same subscriber registry.
#[derive(Clone, Default)]
pub struct InMemoryChangeFeed {
    inner: Arc<FeedInner>,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change event to every subscriber of `table`.
    /// Returns the number of channels that received it.
    pub fn publish(&self, table: Table, kind: ChangeKind) -> usize {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ChangeEvent {
            table,
            kind,
            sequence,
        };

        let mut delivered = 0usize;
        let mut closed = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for ((sub_table, channel), tx) in subscribers.iter() {
                if *sub_table != table {
                    continue;
                }
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push((*sub_table, channel.clone()));
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for key in closed {
                subscribers.remove(&key);
            }
        }

        debug!(table = %table, ?kind, sequence, delivered, "Published change event");
        delivered
    }

    /// Make future subscriptions to `table` fail
    pub fn reject_table(&self, table: Table) {
        self.inner.rejected_tables.write().insert(table);
    }

    pub fn accept_table(&self, table: Table) {
        self.inner.rejected_tables.write().remove(&table);
    }

    /// Number of live (table, channel) subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Live subscriptions registered under `channel`
    pub fn subscriptions_for(&self, channel: &ChannelId) -> usize {
        self.inner
            .subscribers
            .read()
            .keys()
            .filter(|(_, c)| c == channel)
            .count()
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn subscribe<'a>(
        &'a self,
        table: Table,
        channel: &'a ChannelId,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, FeedError>> + Send + 'a>> {
        Box::pin(async move {
            if self.inner.rejected_tables.read().contains(&table) {
                return Err(FeedError::Rejected(format!("{} is not replicated", table)));
            }

            let mut subscribers = self.inner.subscribers.write();
            let key = (table, channel.clone());
            if subscribers.contains_key(&key) {
                return Err(FeedError::ChannelInUse(channel.to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            subscribers.insert(key, tx);
            debug!(table = %table, channel = %channel, "Subscribed");
            Ok(rx)
        })
    }

    fn unsubscribe(&self, channel: &ChannelId) -> usize {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(_, c), _| c != channel);
        let removed = before - subscribers.len();
        debug!(channel = %channel, removed, "Unsubscribed");
        removed
    }
}
