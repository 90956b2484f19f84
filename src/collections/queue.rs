//! A topic-partitioned, at-least-once in-memory message queue with
//! per-`(topic, group)` offsets, a 30-second advisory lease enforcing a
//! single in-flight consumer per group, and a background reaper that
//! drops TTL-expired messages.

use crate::domain::errors::QueueError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);
pub const REAPER_PERIOD: Duration = Duration::from_secs(30);

struct Entry<T> {
    data: T,
    expire_at: DateTime<Utc>,
}

#[derive(Default)]
struct GroupState {
    next_offset: u64,
    lease_expires_at: Option<DateTime<Utc>>,
}

struct Topic<T> {
    length: u64,
    messages: BTreeMap<u64, Entry<T>>,
    groups: HashMap<String, GroupState>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            length: 0,
            messages: BTreeMap::new(),
            groups: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub offset: u64,
    pub data: T,
}

pub struct MessageQueue<T> {
    topics: RwLock<HashMap<String, Arc<Mutex<Topic<T>>>>>,
    retention: ChronoDuration,
    lease: ChronoDuration,
}

impl<T: Clone + Send + Sync + 'static> MessageQueue<T> {
    pub fn new(retention: ChronoDuration) -> Self {
        Self::with_lease(retention, ChronoDuration::from_std(DEFAULT_LEASE).unwrap())
    }

    pub fn with_lease(retention: ChronoDuration, lease: ChronoDuration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            retention,
            lease,
        }
    }

    async fn topic(&self, name: &str) -> Arc<Mutex<Topic<T>>> {
        if let Some(t) = self.topics.read().await.get(name) {
            return t.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Topic::default())))
            .clone()
    }

    /// Assigns `offset = ++length`, stamps `expire_at`, stores the
    /// message. Topics are created lazily.
    pub async fn push(&self, topic: &str, data: T, expire: Option<ChronoDuration>) -> u64 {
        let t = self.topic(topic).await;
        let mut t = t.lock().await;
        t.length += 1;
        let offset = t.length;
        let expire_at = Utc::now() + expire.unwrap_or(self.retention);
        t.messages.insert(offset, Entry { data, expire_at });
        offset
    }

    /// Acquires the group's lease, scans forward from `next_offset`
    /// skipping missing/expired entries, and returns the first live
    /// message. Releases the lease and returns `NoMessage` if none is
    /// found.
    pub async fn consume(&self, topic: &str, group: &str) -> Result<Delivery<T>, QueueError> {
        let t = self.topic(topic).await;
        let mut t = t.lock().await;
        let now = Utc::now();

        let state = t.groups.entry(group.to_string()).or_default();
        if let Some(expires_at) = state.lease_expires_at {
            if expires_at > now {
                return Err(QueueError::MustCommitBeforeConsuming);
            }
        }
        // Acquire (or re-acquire past an expired lease).
        state.lease_expires_at = Some(now + self.lease);

        let length = t.length;
        let mut offset = t.groups.get(group).unwrap().next_offset.max(1);
        let result = loop {
            if offset > length {
                break None;
            }
            match t.messages.get(&offset) {
                Some(entry) if entry.expire_at >= now => {
                    break Some(Delivery {
                        offset,
                        data: entry.data.clone(),
                    });
                }
                _ => {
                    offset += 1;
                }
            }
        };

        let state = t.groups.get_mut(group).unwrap();
        state.next_offset = offset;
        match result {
            Some(delivery) => Ok(delivery),
            None => {
                // Nothing to deliver; release the lease immediately.
                state.lease_expires_at = None;
                Err(QueueError::NoMessage)
            }
        }
    }

    /// Sets `next_offset = committed_offset + 1` and releases the
    /// lease. Idempotent.
    pub async fn commit(&self, topic: &str, group: &str, committed_offset: u64) {
        let t = self.topic(topic).await;
        let mut t = t.lock().await;
        let state = t.groups.entry(group.to_string()).or_default();
        state.next_offset = state.next_offset.max(committed_offset + 1);
        state.lease_expires_at = None;
    }

    /// Removes entries with `expire_at < now` from every topic. Called
    /// on a 30-second tick by the reaper task.
    pub async fn reap(&self) {
        let now = Utc::now();
        let topics = self.topics.read().await;
        for topic in topics.values() {
            let mut topic = topic.lock().await;
            topic.messages.retain(|_, entry| entry.expire_at >= now);
        }
    }

    /// Spawns the background reaper loop; returns its join handle.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_PERIOD);
            loop {
                ticker.tick().await;
                queue.reap().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_lease_queue() -> MessageQueue<String> {
        MessageQueue::with_lease(ChronoDuration::hours(1), ChronoDuration::milliseconds(50))
    }

    #[tokio::test]
    async fn push_then_consume_returns_same_offset() {
        let q = short_lease_queue();
        let offset = q.push("t", "hello".to_string(), None).await;
        let d = q.consume("t", "g").await.unwrap();
        assert_eq!(d.offset, offset);
        assert_eq!(d.data, "hello");
    }

    #[tokio::test]
    async fn uncommitted_message_is_redelivered_after_lease_expiry() {
        let q = short_lease_queue();
        let offset = q.push("t", "hello".to_string(), None).await;
        let first = q.consume("t", "g").await.unwrap();
        assert_eq!(first.offset, offset);

        // Concurrent consume fails while lease is held.
        assert!(matches!(
            q.consume("t", "g").await,
            Err(QueueError::MustCommitBeforeConsuming)
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;

        let redelivered = q.consume("t", "g").await.unwrap();
        assert_eq!(redelivered.offset, offset);
        assert_eq!(redelivered.data, "hello");
    }

    #[tokio::test]
    async fn commit_advances_next_offset_and_releases_lease() {
        let q = short_lease_queue();
        q.push("t", "a".to_string(), None).await;
        q.push("t", "b".to_string(), None).await;

        let first = q.consume("t", "g").await.unwrap();
        q.commit("t", "g", first.offset).await;

        let second = q.consume("t", "g").await.unwrap();
        assert_eq!(second.data, "b");
        q.commit("t", "g", second.offset).await;

        assert!(matches!(
            q.consume("t", "g").await,
            Err(QueueError::NoMessage)
        ));
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let q = short_lease_queue();
        q.push("t", "a".to_string(), None).await;
        let d = q.consume("t", "g").await.unwrap();
        q.commit("t", "g", d.offset).await;
        q.commit("t", "g", d.offset).await;
        assert!(matches!(
            q.consume("t", "g").await,
            Err(QueueError::NoMessage)
        ));
    }

    #[tokio::test]
    async fn expired_message_is_skipped_and_reaped() {
        let q = MessageQueue::<String>::new(ChronoDuration::milliseconds(10));
        q.push("t", "stale".to_string(), None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(
            q.consume("t", "g").await,
            Err(QueueError::NoMessage)
        ));
        q.reap().await;
        let topics = q.topics.read().await;
        let topic = topics.get("t").unwrap().lock().await;
        assert!(topic.messages.is_empty());
    }

    #[tokio::test]
    async fn independent_groups_each_see_every_message() {
        let q = short_lease_queue();
        q.push("t", "x".to_string(), None).await;
        let a = q.consume("t", "group-a").await.unwrap();
        let b = q.consume("t", "group-b").await.unwrap();
        assert_eq!(a.data, "x");
        assert_eq!(b.data, "x");
    }
}
