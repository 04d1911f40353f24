use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process serialization of relay work per (guild, original message id).
/// Create, edit and delete for the same original message never run
/// concurrently; different messages proceed in parallel. Entries are removed
/// once the last holder releases, so the table stays bounded by in-flight
/// work.
#[derive(Default)]
pub struct MessageLockTable {
    locks: Mutex<HashMap<(i64, i64), Arc<AsyncMutex<()>>>>,
}

pub struct MessageLockGuard<'a> {
    table: &'a MessageLockTable,
    key: (i64, i64),
    _guard: OwnedMutexGuard<()>,
}

impl MessageLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, guild_id: i64, message_id: i64) -> MessageLockGuard<'_> {
        let key = (guild_id, message_id);
        let lock = self.locks.lock().entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        MessageLockGuard {
            table: self,
            key,
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for MessageLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.table.locks.lock();
        if let Some(lock) = locks.get(&self.key) {
            // Two strong refs mean the table entry plus our own guard: nobody
            // else holds or waits on this lock, so the entry can go.
            if Arc::strong_count(lock) == 2 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::MessageLockTable;

    #[tokio::test]
    async fn same_message_is_serialized() {
        let table = Arc::new(MessageLockTable::new());
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let table = table.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire(1, 100).await;
                log.lock().push(("enter", i));
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().push(("exit", i));
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        // Every enter must be followed by its own exit before the next enter.
        let log = log.lock();
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "exit");
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[tokio::test]
    async fn different_messages_run_concurrently() {
        let table = Arc::new(MessageLockTable::new());

        let guard_a = table.acquire(1, 100).await;
        // A second key must not block behind the first.
        let guard_b = tokio::time::timeout(Duration::from_millis(50), table.acquire(1, 101))
            .await
            .expect("independent key acquired without waiting");

        drop(guard_a);
        drop(guard_b);
    }

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let table = MessageLockTable::new();
        {
            let _guard = table.acquire(1, 100).await;
            assert_eq!(table.len(), 1);
        }
        assert_eq!(table.len(), 0);
    }
}
