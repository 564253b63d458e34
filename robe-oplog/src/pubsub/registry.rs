use super::topic::TopicPattern;
use crate::core::{ChangeEvent, OperationKind, WatchError};
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Subscriber callback: `(collection, operation, payload)`
///
/// Identity (for removal) is the `Arc` allocation, so keep a clone of the
/// value passed to `subscribe` to unsubscribe later.
pub type Callback =
    Arc<dyn Fn(&str, OperationKind, &serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&str, OperationKind, &serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registered (pattern, callback) pair
struct Subscription {
    /// Registration order across exact and wildcard tables
    seq: u64,
    pattern: TopicPattern,
    callback: Callback,
}

/// Subscription table
struct Table {
    /// Exact `<collection>:<operation>` subscriptions
    exact: Trie<String, Vec<Arc<Subscription>>>,
    /// Subscriptions with at least one wildcard segment
    wildcards: Vec<Arc<Subscription>>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            exact: Trie::new(),
            wildcards: Vec::new(),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub exact_topics: usize,
    pub exact_subscriptions: usize,
    pub wildcard_subscriptions: usize,
    pub total_subscriptions: usize,
}

/// Result of dispatching one event
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Subscriptions whose pattern matched
    pub matched: usize,
    /// Callbacks that returned without error
    pub delivered: usize,
    /// One error per failed callback
    pub failures: Vec<WatchError>,
}

/// Subscription registry and dispatcher
///
/// - Exact topics live in a trie, wildcard patterns in a separate list
/// - Dispatch snapshots the matching subscriptions under a read lock and
///   releases it before running callbacks, so callbacks may subscribe or
///   unsubscribe without deadlocking and never see a half-applied change
/// - Matching callbacks run in registration order; a failing or panicking
///   callback does not stop the ones after it
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    table: Arc<RwLock<Table>>,
    next_seq: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `pattern`
    pub fn subscribe(&self, pattern: TopicPattern, callback: Callback) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let key = pattern.to_string();
        let subscription = Arc::new(Subscription {
            seq,
            pattern,
            callback,
        });

        let mut table = self.table.write();
        if subscription.pattern.is_wildcard() {
            table.wildcards.push(subscription);
            debug!("Added wildcard subscription {}", key);
        } else {
            if let Some(subs) = table.exact.get_mut(&key) {
                subs.push(subscription);
            } else {
                table.exact.insert(key.clone(), vec![subscription]);
            }
            debug!("Added subscription {}", key);
        }
    }

    /// Remove every registration of exactly (`pattern`, `callback`).
    /// Returns how many were removed; zero is not an error.
    pub fn unsubscribe(&self, pattern: &TopicPattern, callback: &Callback) -> usize {
        let same = |sub: &Arc<Subscription>| {
            sub.pattern == *pattern && Arc::ptr_eq(&sub.callback, callback)
        };

        let mut table = self.table.write();
        let removed = if pattern.is_wildcard() {
            let before = table.wildcards.len();
            table.wildcards.retain(|sub| !same(sub));
            before - table.wildcards.len()
        } else {
            let key = pattern.to_string();
            let mut removed = 0;
            let mut now_empty = false;
            if let Some(subs) = table.exact.get_mut(&key) {
                let before = subs.len();
                subs.retain(|sub| !same(sub));
                removed = before - subs.len();
                now_empty = subs.is_empty();
            }
            if now_empty {
                table.exact.remove(&key);
            }
            removed
        };

        debug!("Removed {} subscriptions for {}", removed, pattern);
        removed
    }

    /// Deliver `event` to every matching subscriber
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchOutcome {
        let subscriptions = self.matching(&event.collection, event.kind);

        let mut outcome = DispatchOutcome {
            matched: subscriptions.len(),
            ..Default::default()
        };

        for sub in subscriptions {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                (sub.callback)(&event.collection, event.kind, &event.payload)
            }));

            let message = match result {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => format!("callback panicked: {}", panic_message(panic.as_ref())),
            };

            warn!(
                "Subscriber on {} failed for {} at {}: {}",
                sub.pattern,
                event.topic(),
                event.position,
                message
            );
            outcome.failures.push(WatchError::SubscriberCallback {
                topic: sub.pattern.to_string(),
                message,
            });
        }

        outcome
    }

    /// Whether any subscription matches the concrete topic
    pub fn has_subscribers(&self, collection: &str, kind: OperationKind) -> bool {
        !self.matching(collection, kind).is_empty()
    }

    /// Remove all subscriptions
    pub fn clear(&self) {
        let mut table = self.table.write();
        table.exact = Trie::new();
        table.wildcards.clear();
        debug!("Subscription registry cleared");
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        let table = self.table.read();
        table.exact.values().map(|subs| subs.len()).sum::<usize>() + table.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct patterns with at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        let table = self.table.read();
        let mut topics: Vec<String> = table.exact.keys().cloned().collect();
        for sub in &table.wildcards {
            let key = sub.pattern.to_string();
            if !topics.contains(&key) {
                topics.push(key);
            }
        }
        topics
    }

    pub fn stats(&self) -> RegistryStats {
        let table = self.table.read();
        let exact_subscriptions: usize = table.exact.values().map(|subs| subs.len()).sum();

        RegistryStats {
            exact_topics: table.exact.len(),
            exact_subscriptions,
            wildcard_subscriptions: table.wildcards.len(),
            total_subscriptions: exact_subscriptions + table.wildcards.len(),
        }
    }

    /// Snapshot of matching subscriptions in registration order
    fn matching(&self, collection: &str, kind: OperationKind) -> Vec<Arc<Subscription>> {
        let key = format!("{}:{}", collection, kind);
        let table = self.table.read();

        let mut subs: Vec<Arc<Subscription>> = table
            .exact
            .get(&key)
            .map(|subs| subs.to_vec())
            .unwrap_or_default();
        subs.extend(
            table
                .wildcards
                .iter()
                .filter(|sub| sub.pattern.matches(collection, kind))
                .cloned(),
        );
        drop(table);

        subs.sort_by_key(|sub| sub.seq);
        subs
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResumePosition;
    use parking_lot::Mutex;
    use serde_json::json;

    fn event(collection: &str, kind: OperationKind) -> ChangeEvent {
        ChangeEvent {
            database: "shop".to_string(),
            collection: collection.to_string(),
            kind,
            payload: json!({"collection": collection}),
            position: ResumePosition::new(1, 1),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Callback {
        let log = Arc::clone(log);
        callback(move |collection, kind, _payload| {
            log.lock().push(format!("{}:{}:{}", name, collection, kind));
            Ok(())
        })
    }

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::parse(p).unwrap()
    }

    #[test]
    fn test_exact_subscription() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(pattern("orders:insert"), recorder(&log, "a"));

        let outcome = registry.dispatch(&event("orders", OperationKind::Insert));
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.delivered, 1);

        let outcome = registry.dispatch(&event("orders", OperationKind::Delete));
        assert_eq!(outcome.matched, 0);

        assert_eq!(*log.lock(), vec!["a:orders:insert"]);

        let stats = registry.stats();
        assert_eq!(stats.exact_topics, 1);
        assert_eq!(stats.total_subscriptions, 1);
    }

    #[test]
    fn test_wildcard_dispatch() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(pattern("*:insert"), recorder(&log, "inserts"));
        registry.subscribe(pattern("orders:*"), recorder(&log, "orders"));
        registry.subscribe(pattern("*:*"), recorder(&log, "all"));

        registry.dispatch(&event("orders", OperationKind::Insert));
        registry.dispatch(&event("users", OperationKind::Insert));
        registry.dispatch(&event("orders", OperationKind::Delete));
        registry.dispatch(&event("users", OperationKind::Update));

        assert_eq!(
            *log.lock(),
            vec![
                "inserts:orders:insert",
                "orders:orders:insert",
                "all:orders:insert",
                "inserts:users:insert",
                "all:users:insert",
                "orders:orders:delete",
                "all:orders:delete",
                "all:users:update",
            ]
        );
    }

    #[test]
    fn test_registration_order_across_tables() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(pattern("*:*"), recorder(&log, "first"));
        registry.subscribe(pattern("orders:insert"), recorder(&log, "second"));
        registry.subscribe(pattern("orders:*"), recorder(&log, "third"));
        registry.subscribe(pattern("orders:insert"), recorder(&log, "fourth"));

        registry.dispatch(&event("orders", OperationKind::Insert));

        let names: Vec<String> = log
            .lock()
            .iter()
            .map(|entry| entry.split(':').next().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(
            pattern("orders:*"),
            callback(|_, _, _| Err(anyhow::anyhow!("rejected"))),
        );
        registry.subscribe(
            pattern("orders:*"),
            callback(|_, _, _| panic!("subscriber bug")),
        );
        registry.subscribe(pattern("orders:*"), recorder(&log, "b"));

        let outcome = registry.dispatch(&event("orders", OperationKind::Insert));

        assert_eq!(outcome.matched, 3);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0].to_string().contains("rejected"));
        assert!(outcome.failures[1].to_string().contains("subscriber bug"));
        assert_eq!(*log.lock(), vec!["b:orders:insert"]);
    }

    #[test]
    fn test_unsubscribe_exact_pair() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        registry.subscribe(pattern("orders:*"), a.clone());
        registry.subscribe(pattern("orders:*"), b.clone());
        registry.subscribe(pattern("orders:insert"), a.clone());

        // Wrong pattern for this callback: no-op
        assert_eq!(registry.unsubscribe(&pattern("users:*"), &a), 0);
        // Same pattern, different callback identity
        let lookalike = recorder(&log, "a");
        assert_eq!(registry.unsubscribe(&pattern("orders:*"), &lookalike), 0);

        assert_eq!(registry.unsubscribe(&pattern("orders:*"), &a), 1);
        assert_eq!(registry.len(), 2);

        registry.dispatch(&event("orders", OperationKind::Insert));
        assert_eq!(*log.lock(), vec!["b:orders:insert", "a:orders:insert"]);

        assert_eq!(registry.unsubscribe(&pattern("orders:insert"), &a), 1);
        assert_eq!(registry.stats().exact_topics, 0);
    }

    #[test]
    fn test_callback_can_modify_registry() {
        let registry = SubscriptionRegistry::new();
        let inner = registry.clone();

        registry.subscribe(
            pattern("orders:insert"),
            callback(move |_, _, _| {
                inner.subscribe(TopicPattern::any(), callback(|_, _, _| Ok(())));
                Ok(())
            }),
        );

        let outcome = registry.dispatch(&event("orders", OperationKind::Insert));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear_and_topics() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(pattern("orders:insert"), callback(|_, _, _| Ok(())));
        registry.subscribe(pattern("*:delete"), callback(|_, _, _| Ok(())));
        registry.subscribe(pattern("*:delete"), callback(|_, _, _| Ok(())));

        let mut topics = registry.topics();
        topics.sort();
        assert_eq!(topics, vec!["*:delete", "orders:insert"]);
        assert!(registry.has_subscribers("users", OperationKind::Delete));

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.has_subscribers("users", OperationKind::Delete));
    }
}
