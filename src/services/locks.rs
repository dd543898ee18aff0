use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Таблица мьютексов по ключу: `(trip_id, seat_number)` для мест, `trip_id` для рейсов,
/// `user_id` для лимита холдов пользователя.
///
/// Операции над разными ключами не блокируют друг друга. Порядок захвата всегда
/// место → рейс или место → пользователь, обратный порядок запрещён.
pub struct LockTable<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

pub type SeatKey = (i64, String);

impl<K> Default for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        // Клонируем Arc и отпускаем шард DashMap до await
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Удаляет записи, которые никто не держит и не ждёт. Возвращает число удалённых.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let table = Arc::new(LockTable::<SeatKey>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock((1, "1A".to_string())).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let table = LockTable::<i64>::new();
        let _a = table.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(50), table.lock(2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let table = LockTable::<i64>::new();
        let held = table.lock(1).await;
        drop(table.lock(2).await);
        assert_eq!(table.prune(), 1);
        assert_eq!(table.len(), 1);
        drop(held);
        assert_eq!(table.prune(), 1);
        assert!(table.is_empty());
    }
}
