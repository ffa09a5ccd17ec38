//! In-memory implementation of [`Store`].
//!
//! Intended for tests and local development. Each operation runs under a
//! single lock, which gives the same per-command atomicity Redis does.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::Store;
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct Data {
    sets: HashMap<String, BTreeSet<String>>,
    /// Index 0 is the head (left end).
    lists: HashMap<String, VecDeque<String>>,
    /// Kept sorted by (score, member), like a Redis sorted set.
    zsets: HashMap<String, Vec<(f64, String)>>,
    counters: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> QueueResult<MutexGuard<'_, Data>> {
        self.data
            .lock()
            .map_err(|_| QueueError::store("memory store lock poisoned"))
    }

    fn try_move(&self, source: &str, destination: &str) -> QueueResult<Option<String>> {
        let mut data = self.data()?;
        let item = match data.lists.get_mut(source).and_then(|list| list.pop_back()) {
            Some(item) => item,
            None => return Ok(None),
        };
        data.lists
            .entry(destination.to_string())
            .or_default()
            .push_front(item.clone());
        Ok(Some(item))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()> {
        self.data()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self
            .data()?
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        self.data()?
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        Ok(self.data()?.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn lrange(&self, key: &str) -> QueueResult<Vec<String>> {
        Ok(self
            .data()?
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn lrem_last(&self, key: &str, value: &str) -> QueueResult<u64> {
        let mut data = self.data()?;
        let Some(list) = data.lists.get_mut(key) else {
            return Ok(0);
        };
        match list.iter().rposition(|item| item == value) {
            Some(index) => {
                list.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before looking, so a push in between is not missed.
            let pushed = self.pushed.notified();
            if let Some(item) = self.try_move(source, destination)? {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> QueueResult<()> {
        let mut data = self.data()?;
        let zset = data.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, existing)| existing != member);
        let index = zset.partition_point(|(s, m)| {
            s.total_cmp(&score).then_with(|| m.as_str().cmp(member)).is_lt()
        });
        zset.insert(index, (score, member.to_string()));
        Ok(())
    }

    async fn zfirst_due(&self, key: &str, max: f64) -> QueueResult<Option<String>> {
        Ok(self
            .data()?
            .zsets
            .get(key)
            .and_then(|zset| zset.first())
            .filter(|(score, _)| *score <= max)
            .map(|(_, member)| member.clone()))
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<u64> {
        let mut data = self.data()?;
        let Some(zset) = data.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|(_, existing)| existing != member);
        Ok((before - zset.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        Ok(self.data()?.zsets.get(key).map_or(0, |zset| zset.len() as u64))
    }

    async fn zrange_with_scores(&self, key: &str) -> QueueResult<Vec<(String, f64)>> {
        Ok(self
            .data()?
            .zsets
            .get(key)
            .map(|zset| zset.iter().map(|(s, m)| (m.clone(), *s)).collect())
            .unwrap_or_default())
    }

    async fn incr_all(&self, keys: &[String]) -> QueueResult<()> {
        let mut data = self.data()?;
        for key in keys {
            *data.counters.entry(key.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn counter(&self, key: &str) -> QueueResult<i64> {
        Ok(self.data()?.counters.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_is_lifo_pushed_fifo_claimed() {
        let store = MemoryStore::new();
        store.lpush("q", "a").await.unwrap();
        store.lpush("q", "b").await.unwrap();

        assert_eq!(store.lrange("q").await.unwrap(), vec!["b", "a"]);

        let claimed = store.claim("q", "q:inprogress", Duration::from_millis(10)).await.unwrap();
        assert_eq!(claimed.as_deref(), Some("a"));
        assert_eq!(store.lrange("q:inprogress").await.unwrap(), vec!["a"]);
        assert_eq!(store.llen("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_times_out_on_empty_list() {
        let store = MemoryStore::new();

        let claimed = store.claim("q", "p", Duration::from_millis(20)).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_claim_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim("q", "p", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.lpush("q", "job").await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert_eq!(claimed.as_deref(), Some("job"));
    }

    #[tokio::test]
    async fn test_lrem_last_removes_one_occurrence() {
        let store = MemoryStore::new();
        store.lpush("l", "x").await.unwrap();
        store.lpush("l", "y").await.unwrap();
        store.lpush("l", "x").await.unwrap();

        assert_eq!(store.lrem_last("l", "x").await.unwrap(), 1);
        assert_eq!(store.lrange("l").await.unwrap(), vec!["x", "y"]);
        assert_eq!(store.lrem_last("l", "z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sorted_set_orders_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", 30.0, "c").await.unwrap();
        store.zadd("z", 10.0, "a").await.unwrap();
        store.zadd("z", 20.0, "b").await.unwrap();
        store.zadd("z", 5.0, "c").await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(store.zfirst_due("z", 4.0).await.unwrap(), None);
        assert_eq!(store.zfirst_due("z", 100.0).await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.zrem("z", "c").await.unwrap(), 1);
        assert_eq!(store.zrem("z", "c").await.unwrap(), 0);
        assert_eq!(
            store.zrange_with_scores("z").await.unwrap(),
            vec![("a".to_string(), 10.0), ("b".to_string(), 20.0)]
        );
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStore::new();
        let keys = vec!["stat:processed".to_string(), "stat:processed:day".to_string()];

        store.incr_all(&keys).await.unwrap();
        store.incr_all(&keys[..1]).await.unwrap();

        assert_eq!(store.counter("stat:processed").await.unwrap(), 2);
        assert_eq!(store.counter("stat:processed:day").await.unwrap(), 1);
        assert_eq!(store.counter("stat:failed").await.unwrap(), 0);
    }
}
