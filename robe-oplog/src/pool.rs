//! Database and collection handles
//!
//! A [`ConnectionPool`] keeps one [`Database`] per name. Each database owns
//! at most one oplog [`Watcher`], created on first use and restricted to that
//! database. [`Collection`] handles subscribe to `<collection>:*` on it.

use crate::config::WatcherConfig;
use crate::core::{WatchError, WatchResult};
use crate::oplog::OplogSource;
use crate::pubsub::{Callback, TopicPattern};
use crate::watcher::Watcher;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of open databases
#[derive(Default)]
pub struct ConnectionPool {
    databases: RwLock<HashMap<String, Database>>,
    /// Template for the watchers of databases opened through the pool
    config: WatcherConfig,
}

impl ConnectionPool {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Open `name` on `source`, or return the database already registered
    /// under that name
    pub fn register(&self, name: &str, source: Arc<dyn OplogSource>) -> WatchResult<Database> {
        let mut databases = self.databases.write();
        if let Some(existing) = databases.get(name) {
            debug!("Database {} already registered", name);
            return Ok(existing.clone());
        }

        let database = Database::new(name, source, self.config.clone())?;
        databases.insert(name.to_string(), database.clone());
        info!("Registered database {}", name);
        Ok(database)
    }

    pub fn get(&self, name: &str) -> Option<Database> {
        self.databases.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.databases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every database and empty the pool
    pub async fn close_all(&self) {
        let databases: Vec<Database> = self.databases.write().drain().map(|(_, db)| db).collect();

        info!("Closing {} databases", databases.len());
        for database in databases {
            database.close().await;
        }
    }
}

/// Handle to one database
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    name: String,
    source: Arc<dyn OplogSource>,
    config: WatcherConfig,
    oplog: Mutex<Option<Watcher>>,
}

impl Database {
    pub fn new(
        name: &str,
        source: Arc<dyn OplogSource>,
        config: WatcherConfig,
    ) -> WatchResult<Self> {
        let config = WatcherConfig {
            database: Some(name.to_string()),
            ..config
        };
        config.validate().map_err(WatchError::Config)?;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                name: name.to_string(),
                source,
                config,
                oplog: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The database's watcher, created on first call
    pub fn oplog(&self) -> WatchResult<Watcher> {
        let mut oplog = self.inner.oplog.lock();
        if let Some(watcher) = oplog.as_ref() {
            return Ok(watcher.clone());
        }

        let watcher = Watcher::new(Arc::clone(&self.inner.source), self.inner.config.clone())?;
        *oplog = Some(watcher.clone());
        Ok(watcher)
    }

    /// Handle to collection `name`; rejects names no topic can carry
    pub fn collection(&self, name: &str) -> WatchResult<Collection> {
        TopicPattern::collection(name)?;

        Ok(Collection {
            name: name.to_string(),
            database: self.clone(),
        })
    }

    /// The watcher, only if [`oplog`](Self::oplog) already created it
    fn existing_oplog(&self) -> Option<Watcher> {
        self.inner.oplog.lock().clone()
    }

    /// Stop the watcher if one was created
    pub async fn close(&self) {
        if let Some(watcher) = self.existing_oplog() {
            watcher.stop().await;
        }
        debug!("Closed database {}", self.inner.name);
    }
}

/// Handle to one collection of a [`Database`]
#[derive(Clone)]
pub struct Collection {
    name: String,
    database: Database,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Subscribe to every operation on this collection
    pub fn watch(&self, callback: Callback) -> WatchResult<()> {
        self.database.oplog()?.watch(&self.name, callback)
    }

    /// Remove a subscription added with [`watch`](Self::watch). Without a
    /// watcher there is nothing to remove.
    pub fn unwatch(&self, callback: &Callback) -> WatchResult<()> {
        match self.database.existing_oplog() {
            Some(watcher) => watcher.unwatch(&self.name, callback),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OperationKind;
    use crate::oplog::MemoryOplog;
    use crate::pubsub::callback;
    use crate::watcher::WatcherState;
    use serde_json::json;
    use std::time::Duration;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(WatcherConfig {
            reconnect_delay_ms: 20,
            ..WatcherConfig::default()
        })
    }

    #[test]
    fn test_register_is_idempotent() {
        let pool = pool();
        let log = Arc::new(MemoryOplog::new());

        let a = pool.register("shop", log.clone()).unwrap();
        let b = pool.register("shop", log).unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.names(), vec!["shop".to_string()]);
        assert!(pool.get("other").is_none());
    }

    #[test]
    fn test_invalid_database_name() {
        let pool = pool();
        let err = pool
            .register("bad.name", Arc::new(MemoryOplog::new()))
            .err()
            .unwrap();
        assert!(matches!(err, WatchError::Config(_)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_oplog_is_created_once() {
        let db = Database::new("shop", Arc::new(MemoryOplog::new()), WatcherConfig::default())
            .unwrap();
        let first = db.oplog().unwrap();
        let second = db.oplog().unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.config().database.as_deref(), Some("shop"));
    }

    #[tokio::test]
    async fn test_collection_watch_and_close_all() {
        let pool = pool();
        let log = MemoryOplog::new();
        let db = pool.register("shop", Arc::new(log.clone())).unwrap();
        let orders = db.collection("orders").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |collection, kind, _| {
            sink.lock().push((collection.to_string(), kind));
            Ok(())
        });
        orders.watch(cb).unwrap();

        let watcher = db.oplog().unwrap();
        for _ in 0..200 {
            if watcher.state() == WatcherState::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(watcher.state(), WatcherState::Active);

        log.update("shop.orders", json!({"_id": 1}));
        log.update("shop.customers", json!({"_id": 1}));
        for _ in 0..200 {
            if watcher.stats().entries_read == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            *seen.lock(),
            vec![("orders".to_string(), OperationKind::Update)]
        );

        pool.close_all().await;
        assert!(pool.is_empty());
        assert_eq!(watcher.state(), WatcherState::Stopped);
        assert_eq!(log.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_all_right_after_watch() {
        let pool = pool();
        let log = MemoryOplog::new();
        let db = pool.register("shop", Arc::new(log.clone())).unwrap();
        db.collection("orders")
            .unwrap()
            .watch(callback(|_, _, _| Ok(())))
            .unwrap();

        pool.close_all().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let watcher = db.oplog().unwrap();
        assert_eq!(watcher.state(), WatcherState::Stopped);
        assert_eq!(log.tails_opened(), 0);
        assert_eq!(log.live_connections(), 0);
    }

    #[test]
    fn test_unwatch_without_watcher() {
        let db = Database::new("shop", Arc::new(MemoryOplog::new()), WatcherConfig::default())
            .unwrap();
        let orders = db.collection("orders").unwrap();

        orders.unwatch(&callback(|_, _, _| Ok(()))).unwrap();
        assert!(db.existing_oplog().is_none());
    }

    #[test]
    fn test_invalid_collection_name() {
        let db = Database::new("shop", Arc::new(MemoryOplog::new()), WatcherConfig::default())
            .unwrap();
        for name in ["", "orders:insert"] {
            let err = db.collection(name).err().unwrap();
            assert!(matches!(err, WatchError::InvalidTopic(_)));
        }
    }
}
