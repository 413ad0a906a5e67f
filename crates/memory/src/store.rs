//! Context store — two independent key→context maps with TTL eviction.
//!
//! The maps are guarded by `tokio::sync::RwLock` so fetch-or-create from
//! message handlers and the periodic sweep never race on the map structure.
//! Context fields are only mutated inside [`ContextStore::with_context`],
//! which holds the write lock for the duration of a synchronous closure and
//! never across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::context::{ContextKey, ConversationContext, Namespace};

type ContextMap = HashMap<ContextKey, ConversationContext>;

/// Sizing and eviction limits applied by the store.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    /// Entries kept per context
    pub max_history: usize,
    /// TTL for contexts without a direct exchange
    pub base_ttl: Duration,
    /// TTL for active conversations
    pub active_ttl: Duration,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            max_history: 30,
            base_ttl: Duration::from_secs(30 * 60),
            active_ttl: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Context counts per namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCounts {
    pub users: usize,
    pub posts: usize,
}

/// What a single sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub users_evicted: usize,
    pub posts_evicted: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.users_evicted + self.posts_evicted
    }
}

/// Owned, non-durable store of user and post contexts for one bot.
pub struct ContextStore {
    users: RwLock<ContextMap>,
    posts: RwLock<ContextMap>,
    policy: StorePolicy,
}

impl ContextStore {
    pub fn new(policy: StorePolicy) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            posts: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    fn map(&self, namespace: Namespace) -> &RwLock<ContextMap> {
        match namespace {
            Namespace::User => &self.users,
            Namespace::Post => &self.posts,
        }
    }

    /// Fetch-or-create a context and return a snapshot of it.
    ///
    /// A non-empty `topic_hint` overwrites the stored topic of an existing
    /// context; the history is left alone. Either way the context counts as
    /// used and its interaction time is refreshed.
    pub async fn get_or_create(
        &self,
        namespace: Namespace,
        key: &ContextKey,
        topic_hint: Option<&str>,
    ) -> ConversationContext {
        self.with_context(namespace, key, topic_hint, |ctx| ctx.clone())
            .await
    }

    /// Fetch-or-create a context, then mutate it in place.
    ///
    /// Same creation and topic semantics as [`ContextStore::get_or_create`].
    /// The closure runs under the namespace's write lock, so it must not
    /// block.
    pub async fn with_context<R>(
        &self,
        namespace: Namespace,
        key: &ContextKey,
        topic_hint: Option<&str>,
        f: impl FnOnce(&mut ConversationContext) -> R,
    ) -> R {
        let hint = topic_hint
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let mut map = self.map(namespace).write().await;
        let mut created = false;
        let ctx = map.entry(key.clone()).or_insert_with(|| {
            created = true;
            ConversationContext::new(hint.clone())
        });

        if created {
            debug!(%namespace, key = %key, "Created conversation context");
        } else {
            if let Some(topic) = hint {
                ctx.topic = Some(topic);
            }
            ctx.touch();
        }
        f(ctx)
    }

    /// Append a turn to a context (creating it if it was evicted meanwhile).
    pub async fn append(
        &self,
        namespace: Namespace,
        key: &ContextKey,
        role: chatmux_core::Role,
        content: &str,
    ) {
        let max_history = self.policy.max_history;
        self.with_context(namespace, key, None, |ctx| {
            ctx.push(role, content, max_history)
        })
        .await;
    }

    /// Read a context without refreshing it.
    pub async fn get(&self, namespace: Namespace, key: &ContextKey) -> Option<ConversationContext> {
        self.map(namespace).read().await.get(key).cloned()
    }

    /// Refresh a context's interaction time. Returns `false` if absent.
    pub async fn touch(&self, namespace: Namespace, key: &ContextKey) -> bool {
        match self.map(namespace).write().await.get_mut(key) {
            Some(ctx) => {
                ctx.touch();
                true
            }
            None => false,
        }
    }

    /// Evict every context idle for longer than its TTL at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        SweepReport {
            users_evicted: self.sweep_namespace(Namespace::User, now).await,
            posts_evicted: self.sweep_namespace(Namespace::Post, now).await,
        }
    }

    async fn sweep_namespace(&self, namespace: Namespace, now: DateTime<Utc>) -> usize {
        let base_ttl = to_chrono(self.policy.base_ttl);
        let active_ttl = to_chrono(self.policy.active_ttl);

        let mut map = self.map(namespace).write().await;
        let before = map.len();
        map.retain(|_, ctx| !ctx.is_expired(now, base_ttl, active_ttl));
        before - map.len()
    }

    /// Number of live contexts in each namespace.
    pub async fn count_active(&self) -> ContextCounts {
        ContextCounts {
            users: self.users.read().await.len(),
            posts: self.posts.read().await.len(),
        }
    }

    /// Run [`ContextStore::sweep`] on a fixed interval until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; nothing to evict yet.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = store.sweep(Utc::now()).await;
                let counts = store.count_active().await;
                if report.total() > 0 {
                    info!(
                        users_evicted = report.users_evicted,
                        posts_evicted = report.posts_evicted,
                        users = counts.users,
                        posts = counts.posts,
                        "Evicted stale conversation contexts"
                    );
                } else {
                    debug!(users = counts.users, posts = counts.posts, "Context sweep");
                }
            }
        })
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(StorePolicy::default())
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmux_core::Role;

    fn key(subject: i64) -> ContextKey {
        ContextKey::new(-100500, subject, "Ava")
    }

    #[tokio::test]
    async fn creates_fresh_context_with_hint() {
        let store = ContextStore::default();
        let ctx = store
            .get_or_create(Namespace::Post, &key(1), Some("price increase"))
            .await;
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.message_count, 0);
        assert!(!ctx.is_active_conversation);
        assert_eq!(ctx.topic.as_deref(), Some("price increase"));
    }

    #[tokio::test]
    async fn topic_hint_overrides_without_touching_history() {
        let store = ContextStore::default();
        let k = key(7);
        store
            .get_or_create(Namespace::Post, &k, Some("first guess"))
            .await;
        store.append(Namespace::Post, &k, Role::User, "post body").await;
        let before = store.get(Namespace::Post, &k).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let after = store
            .get_or_create(Namespace::Post, &k, Some("corrected topic"))
            .await;

        assert_eq!(after.topic.as_deref(), Some("corrected topic"));
        assert_eq!(after.history, before.history);
        assert_eq!(after.message_count, before.message_count);
        assert!(after.last_interaction > before.last_interaction);
    }

    #[tokio::test]
    async fn empty_hint_keeps_existing_topic() {
        let store = ContextStore::default();
        let k = key(8);
        store.get_or_create(Namespace::User, &k, Some("weather")).await;
        let ctx = store.get_or_create(Namespace::User, &k, Some("  ")).await;
        assert_eq!(ctx.topic.as_deref(), Some("weather"));
        let ctx = store.get_or_create(Namespace::User, &k, None).await;
        assert_eq!(ctx.topic.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn namespaces_are_disjoint() {
        let store = ContextStore::default();
        let k = key(3);
        store.append(Namespace::User, &k, Role::User, "hi").await;
        assert!(store.get(Namespace::Post, &k).await.is_none());
        assert_eq!(
            store.count_active().await,
            ContextCounts { users: 1, posts: 0 }
        );
    }

    #[tokio::test]
    async fn keys_do_not_bleed_across_bots() {
        let store = ContextStore::default();
        let ava = ContextKey::new(1, 2, "Ava");
        let max = ContextKey::new(1, 2, "Max");
        store.append(Namespace::User, &ava, Role::User, "for Ava").await;
        let ctx = store.get_or_create(Namespace::User, &max, None).await;
        assert!(ctx.history.is_empty());
    }

    #[tokio::test]
    async fn append_respects_history_bound() {
        let store = ContextStore::new(StorePolicy {
            max_history: 5,
            ..StorePolicy::default()
        });
        let k = key(4);
        for i in 0..12 {
            store
                .append(Namespace::User, &k, Role::User, &format!("m{i}"))
                .await;
        }
        let ctx = store.get(Namespace::User, &k).await.unwrap();
        assert_eq!(ctx.history.len(), 5);
        assert_eq!(ctx.history[0].content, "m7");
        assert_eq!(ctx.message_count, 12);
    }

    #[tokio::test]
    async fn inactive_context_evicted_after_base_ttl_only() {
        let store = ContextStore::default();
        let k = key(10);
        store.get_or_create(Namespace::Post, &k, None).await;
        let t0 = store.get(Namespace::Post, &k).await.unwrap().last_interaction;

        let report = store.sweep(t0 + chrono::Duration::minutes(29)).await;
        assert_eq!(report.total(), 0);
        let report = store.sweep(t0 + chrono::Duration::minutes(30)).await;
        assert_eq!(report.total(), 0, "TTL boundary itself is not expired");

        let report = store.sweep(t0 + chrono::Duration::minutes(31)).await;
        assert_eq!(report.posts_evicted, 1);
        assert!(store.get(Namespace::Post, &k).await.is_none());
    }

    #[tokio::test]
    async fn active_context_survives_base_ttl() {
        let store = ContextStore::default();
        let k = key(11);
        store
            .with_context(Namespace::User, &k, None, |ctx| ctx.mark_active())
            .await;
        let t0 = store.get(Namespace::User, &k).await.unwrap().last_interaction;

        let report = store.sweep(t0 + chrono::Duration::minutes(31)).await;
        assert_eq!(report.total(), 0);
        let report = store.sweep(t0 + chrono::Duration::minutes(119)).await;
        assert_eq!(report.total(), 0);

        let report = store.sweep(t0 + chrono::Duration::minutes(121)).await;
        assert_eq!(report.users_evicted, 1);
        assert_eq!(store.count_active().await, ContextCounts::default());
    }

    #[tokio::test]
    async fn touch_refreshes_only_existing_contexts() {
        let store = ContextStore::default();
        assert!(!store.touch(Namespace::User, &key(12)).await);
        store.get_or_create(Namespace::User, &key(12), None).await;
        assert!(store.touch(Namespace::User, &key(12)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_and_sweeps() {
        let store = Arc::new(ContextStore::default());
        let mut handles = Vec::new();

        for worker in 0..8i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50i64 {
                    let k = ContextKey::new(worker, i, "Ava");
                    store.append(Namespace::User, &k, Role::User, "hello").await;
                    store.get_or_create(Namespace::Post, &k, Some("topic")).await;
                }
            }));
        }
        let sweeper = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    // Nothing is old enough to evict yet.
                    store.sweep(Utc::now()).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for h in handles {
            h.await.unwrap();
        }
        sweeper.await.unwrap();

        assert_eq!(
            store.count_active().await,
            ContextCounts {
                users: 400,
                posts: 400
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_keeps_fresh_contexts() {
        let store = Arc::new(ContextStore::default());
        store.get_or_create(Namespace::User, &key(1), None).await;

        let handle = store.spawn_sweeper(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(181)).await;
        // Wall-clock time hasn't moved, so nothing is stale.
        assert_eq!(store.count_active().await.users, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn sweeper_task_evicts_untouched_contexts() {
        let store = Arc::new(ContextStore::new(StorePolicy {
            max_history: 30,
            base_ttl: Duration::from_millis(20),
            active_ttl: Duration::from_millis(20),
        }));
        store.get_or_create(Namespace::User, &key(1), None).await;
        store.get_or_create(Namespace::Post, &key(2), Some("rates")).await;

        let handle = store.spawn_sweeper(Duration::from_millis(10));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.count_active().await != ContextCounts::default() {
            assert!(tokio::time::Instant::now() < deadline, "sweeper never evicted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
    }
}
