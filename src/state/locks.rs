//! Per-conversation locks
//!
//! A table of async mutexes keyed by conversation id. Entries are created on
//! first use and dropped again once nobody holds or waits on them, so the
//! table only ever contains conversations with work in flight.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<i64, Arc<Mutex<()>>>;

#[derive(Debug, Default, Clone)]
pub struct ConversationLocks {
    table: Arc<LockTable>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one conversation
    pub async fn lock(&self, conversation_id: i64) -> ConversationGuard {
        let lock = self
            .table
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ConversationGuard {
            conversation_id,
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Number of conversations currently locked or waited on
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Held while a conversation is being worked on; unlocks on drop
#[derive(Debug)]
pub struct ConversationGuard {
    conversation_id: i64,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationGuard {
    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table holds the mutex once nobody is using or waiting on it.
        self.table
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_other_conversations_do_not_wait() {
        let locks = ConversationLocks::new();
        let _held = locks.lock(1).await;

        let other = tokio::time::timeout(Duration::from_millis(300), locks.lock(2)).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_same_conversation_waits() {
        let locks = ConversationLocks::new();
        let held = locks.lock(1).await;

        let blocked = tokio::time::timeout(Duration::from_millis(100), locks.lock(1)).await;
        assert!(blocked.is_err());

        drop(held);
        let guard = tokio::time::timeout(Duration::from_millis(300), locks.lock(1))
            .await
            .unwrap();
        assert_eq!(guard.conversation_id(), 1);
    }

    #[tokio::test]
    async fn test_table_is_pruned_after_release() {
        let locks = ConversationLocks::new();
        {
            let _a = locks.lock(1).await;
            let _b = locks.lock(2).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }
}
