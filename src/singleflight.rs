//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one execution. The
//! first caller (leader) runs the work and publishes its result over a
//! `watch` channel; later callers (followers) wait on that channel. The
//! in-flight entry is removed as soon as the leader finishes, whatever the
//! outcome, so nothing is memoized past completion.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::watch;
use tracing::debug;

type Inflight<K, V> = DashMap<K, watch::Receiver<Option<V>>>;

pub struct SingleFlight<K, V> {
    inflight: Inflight<K, V>,
}

enum Role<V> {
    Leader(watch::Sender<Option<V>>),
    Follower(watch::Receiver<Option<V>>),
}

/// Removes the in-flight entry when the leader completes or is dropped.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    inflight: &'a Inflight<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `work` for `key`, or join an execution already in progress.
    ///
    /// If the leader is cancelled before publishing, waiting followers run
    /// `work` themselves rather than failing.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let role = match self.inflight.entry(key.clone()) {
            Entry::Occupied(e) => Role::Follower(e.get().clone()),
            Entry::Vacant(e) => {
                let (tx, rx) = watch::channel(None);
                e.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Follower(mut rx) => {
                if let Ok(published) = rx.wait_for(Option::is_some).await
                    && let Some(value) = published.as_ref()
                {
                    return value.clone();
                }
                debug!("Single-flight leader dropped before publishing, running locally");
                work().await
            }
            Role::Leader(tx) => {
                let _guard = LeaderGuard {
                    inflight: &self.inflight,
                    key,
                };
                let value = work().await;
                tx.send_replace(Some(value.clone()));
                value
            }
        }
    }

    /// Number of keys with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}
