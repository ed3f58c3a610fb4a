//! Reverse lookup from topic keys to the connections interested in them.
//!
//! The index also owns each connection's topic set, so a bucket and the
//! matching membership entry always change under the same write lock:
//!
//! ```text
//! buckets                         memberships
//! "line:L7"     → {c1, c2}        c1 → {"line:L7", "escalation:high"}
//! "escalation:high" → {c1}        c2 → {"line:L7"}
//! ```
//!
//! A connection must be tracked (done by the registry at registration)
//! before it can subscribe; once purged it can never re-enter a bucket.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::{RealtimeError, RealtimeResult};

use super::registry::ConnectionId;

#[derive(Default)]
struct IndexState {
    buckets: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

/// Topic → connection ids, with per-connection membership for O(k) purge.
#[derive(Default)]
pub struct SubscriptionIndex {
    inner: RwLock<IndexState>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly registered connection with no topics.
    pub(crate) fn track(&self, connection_id: &str) {
        self.inner
            .write()
            .memberships
            .entry(connection_id.to_string())
            .or_default();
    }

    /// Add `connection_id` to the bucket for `topic`, creating the bucket if
    /// needed. Returns `true` if the subscription is new; subscribing twice is
    /// a no-op.
    pub fn subscribe(&self, connection_id: &str, topic: &str) -> RealtimeResult<bool> {
        let mut state = self.inner.write();
        let topics = state
            .memberships
            .get_mut(connection_id)
            .ok_or_else(|| RealtimeError::NotFound(connection_id.to_string()))?;

        if !topics.insert(topic.to_string()) {
            return Ok(false);
        }
        state
            .buckets
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(true)
    }

    /// Remove `connection_id` from the bucket for `topic`, dropping the bucket
    /// once it is empty. Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, connection_id: &str, topic: &str) -> bool {
        let mut state = self.inner.write();
        let removed = state
            .memberships
            .get_mut(connection_id)
            .map(|topics| topics.remove(topic))
            .unwrap_or(false);
        if removed {
            remove_from_bucket(&mut state.buckets, topic, connection_id);
        }
        removed
    }

    /// Union of the buckets for `topics`. Unknown topics contribute nothing.
    pub fn resolve<'a, I>(&self, topics: I) -> HashSet<ConnectionId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.inner.read();
        let mut out = HashSet::new();
        for topic in topics {
            if let Some(bucket) = state.buckets.get(topic) {
                out.extend(bucket.iter().cloned());
            }
        }
        out
    }

    /// Remove `connection_id` from every bucket it belongs to and stop
    /// tracking it. Cost is proportional to the topics it held. Returns the
    /// topics that were removed.
    pub fn purge(&self, connection_id: &str) -> Vec<String> {
        let mut state = self.inner.write();
        let Some(topics) = state.memberships.remove(connection_id) else {
            return Vec::new();
        };
        for topic in &topics {
            remove_from_bucket(&mut state.buckets, topic, connection_id);
        }
        topics.into_iter().collect()
    }

    /// Topics held by a tracked connection.
    pub fn topics_of(&self, connection_id: &str) -> Option<HashSet<String>> {
        self.inner.read().memberships.get(connection_id).cloned()
    }

    pub fn topic_count(&self, connection_id: &str) -> usize {
        self.inner
            .read()
            .memberships
            .get(connection_id)
            .map_or(0, HashSet::len)
    }

    /// Subscriber count per live topic, sorted by topic.
    pub fn subscriber_counts(&self) -> BTreeMap<String, usize> {
        self.inner
            .read()
            .buckets
            .iter()
            .map(|(topic, ids)| (topic.clone(), ids.len()))
            .collect()
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Check the bucket/membership biconditional. Returns a description of
    /// the first violation found.
    pub fn verify_consistency(&self) -> Result<(), String> {
        let state = self.inner.read();
        for (topic, ids) in &state.buckets {
            if ids.is_empty() {
                return Err(format!("empty bucket left behind for {topic}"));
            }
            for id in ids {
                let held = state
                    .memberships
                    .get(id)
                    .is_some_and(|topics| topics.contains(topic));
                if !held {
                    return Err(format!("{id} is in bucket {topic} without holding it"));
                }
            }
        }
        for (id, topics) in &state.memberships {
            for topic in topics {
                let indexed = state
                    .buckets
                    .get(topic)
                    .is_some_and(|ids| ids.contains(id));
                if !indexed {
                    return Err(format!("{id} holds {topic} but is missing from its bucket"));
                }
            }
        }
        Ok(())
    }
}

fn remove_from_bucket(
    buckets: &mut HashMap<String, HashSet<ConnectionId>>,
    topic: &str,
    connection_id: &str,
) {
    if let Some(bucket) = buckets.get_mut(topic) {
        bucket.remove(connection_id);
        if bucket.is_empty() {
            buckets.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(ids: &[&str]) -> SubscriptionIndex {
        let index = SubscriptionIndex::new();
        for id in ids {
            index.track(id);
        }
        index
    }

    #[test]
    fn subscribe_is_idempotent() {
        let index = index_with(&["c1"]);
        assert!(index.subscribe("c1", "line:L7").unwrap());
        assert!(!index.subscribe("c1", "line:L7").unwrap());
        assert_eq!(index.subscriber_counts()["line:L7"], 1);
        assert_eq!(index.topic_count("c1"), 1);
    }

    #[test]
    fn subscribe_requires_tracked_connection() {
        let index = SubscriptionIndex::new();
        let err = index.subscribe("ghost", "line:L7").unwrap_err();
        assert!(matches!(err, RealtimeError::NotFound(_)));
        assert_eq!(index.bucket_count(), 0);
    }

    #[test]
    fn unsubscribe_drops_empty_bucket() {
        let index = index_with(&["c1", "c2"]);
        index.subscribe("c1", "andon:L1").unwrap();
        index.subscribe("c2", "andon:L1").unwrap();

        assert!(index.unsubscribe("c1", "andon:L1"));
        assert_eq!(index.bucket_count(), 1);
        assert!(index.unsubscribe("c2", "andon:L1"));
        assert_eq!(index.bucket_count(), 0);

        // Second call is a no-op.
        assert!(!index.unsubscribe("c2", "andon:L1"));
        index.verify_consistency().unwrap();
    }

    #[test]
    fn resolve_unions_buckets_and_ignores_unknown_topics() {
        let index = index_with(&["c1", "c2", "c3"]);
        index.subscribe("c1", "line:L1").unwrap();
        index.subscribe("c2", "line:L2").unwrap();
        index.subscribe("c3", "line:L2").unwrap();
        index.subscribe("c1", "line:L2").unwrap();

        let ids = index.resolve(["line:L1", "line:L2", "line:L99"]);
        assert_eq!(ids.len(), 3);

        assert!(index.resolve(["nothing:here"]).is_empty());
    }

    #[test]
    fn purge_removes_every_membership() {
        let index = index_with(&["c1", "c2"]);
        index.subscribe("c1", "line:L1").unwrap();
        index.subscribe("c1", "downtime:L1").unwrap();
        index.subscribe("c2", "line:L1").unwrap();

        let mut removed = index.purge("c1");
        removed.sort();
        assert_eq!(removed, vec!["downtime:L1", "line:L1"]);

        assert!(!index.resolve(["line:L1", "downtime:L1"]).contains("c1"));
        assert_eq!(index.bucket_count(), 1);
        assert!(index.topics_of("c1").is_none());
        index.verify_consistency().unwrap();
    }

    #[test]
    fn purged_connection_cannot_resubscribe() {
        let index = index_with(&["c1"]);
        index.purge("c1");
        assert!(index.subscribe("c1", "line:L1").is_err());
        assert!(index.purge("c1").is_empty());
    }
}
