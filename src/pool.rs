//! Connection pooling for chunkserver connections.
//!
//! Idle connections are kept per endpoint and handed out most recently
//! returned first, so the connection least likely to have been timed out by
//! the peer is reused. Nothing is health checked on checkout: a stale
//! connection fails on first use and the caller discards it instead of
//! returning it.
//!
//! The pool is an ordinary value. Whoever needs chunk I/O holds a clone, and
//! the owner calls [`ConnectionPool::close_all`] at shutdown.

use crate::error::Result;
use crate::transport::{Transport, TransportSettings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle connections kept per endpoint; extra returns are closed.
    pub max_idle_per_endpoint: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_endpoint: 16,
        }
    }
}

/// Trait for poolable connections.
pub trait Poolable: Send + Sync + Sized + 'static {
    /// Settings used to open new connections.
    type Settings: Clone + Send + Sync + 'static;

    /// Open a new connection to `endpoint`.
    fn create(endpoint: &str, settings: &Self::Settings)
        -> impl Future<Output = Result<Self>> + Send;

    /// Endpoint the connection is attached to.
    fn endpoint(&self) -> &str;

    /// Close the connection.
    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

impl Poolable for Transport {
    type Settings = TransportSettings;

    fn create(
        endpoint: &str,
        settings: &Self::Settings,
    ) -> impl Future<Output = Result<Self>> + Send {
        Transport::open("chunkserver", endpoint.to_string(), settings.clone())
    }

    fn endpoint(&self) -> &str {
        self.peer()
    }

    fn disconnect(self) -> impl Future<Output = ()> + Send {
        async move { self.close().await }
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened by the pool.
    pub connections_created: u64,
    /// Checkouts served from an idle connection.
    pub connections_reused: u64,
    /// Connections handed back for reuse.
    pub connections_returned: u64,
    /// Connections closed instead of being reused.
    pub connections_discarded: u64,
    /// Idle connections currently held.
    pub idle_count: usize,
}

#[derive(Default)]
struct PoolStatsInner {
    connections_created: AtomicU64,
    connections_reused: AtomicU64,
    connections_returned: AtomicU64,
    connections_discarded: AtomicU64,
}

struct PoolInner<C: Poolable> {
    config: PoolConfig,
    settings: C::Settings,
    idle: Mutex<HashMap<String, Vec<C>>>,
    stats: PoolStatsInner,
}

/// Pool of idle connections keyed by endpoint.
pub struct ConnectionPool<C: Poolable> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Poolable> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Pool of chunkserver connections.
pub type ChunkserverPool = ConnectionPool<Transport>;

impl<C: Poolable> ConnectionPool<C> {
    /// Create an empty pool.
    pub fn new(config: PoolConfig, settings: C::Settings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                settings,
                idle: Mutex::new(HashMap::new()),
                stats: PoolStatsInner::default(),
            }),
        }
    }

    /// Check out a connection to `endpoint`, reusing an idle one if possible.
    pub async fn get(&self, endpoint: &str) -> Result<C> {
        let reused = {
            let mut idle = self.inner.idle.lock();
            idle.get_mut(endpoint).and_then(|conns| conns.pop())
        };

        if let Some(conn) = reused {
            self.inner.stats.connections_reused.fetch_add(1, Ordering::Relaxed);
            debug!(endpoint = %endpoint, "Reusing pooled connection");
            return Ok(conn);
        }

        let conn = C::create(endpoint, &self.inner.settings).await?;
        self.inner.stats.connections_created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return a healthy connection for reuse.
    pub async fn put(&self, conn: C) {
        let overflow = {
            let mut idle = self.inner.idle.lock();
            let conns = idle.entry(conn.endpoint().to_string()).or_default();
            if conns.len() < self.inner.config.max_idle_per_endpoint {
                conns.push(conn);
                None
            } else {
                Some(conn)
            }
        };

        match overflow {
            None => {
                self.inner.stats.connections_returned.fetch_add(1, Ordering::Relaxed);
            }
            Some(conn) => self.discard(conn).await,
        }
    }

    /// Close a connection that must not be reused.
    pub async fn discard(&self, conn: C) {
        debug!(endpoint = %conn.endpoint(), "Discarding connection");
        conn.disconnect().await;
        self.inner.stats.connections_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Close every idle connection and leave the pool empty.
    pub async fn close_all(&self) {
        let drained: Vec<C> = {
            let mut idle = self.inner.idle.lock();
            idle.drain().flat_map(|(_, conns)| conns).collect()
        };

        for conn in drained {
            conn.disconnect().await;
        }
    }

    /// Idle connections held for `endpoint`.
    pub fn idle_count(&self, endpoint: &str) -> usize {
        self.inner.idle.lock().get(endpoint).map_or(0, Vec::len)
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let stats = &self.inner.stats;
        PoolStats {
            connections_created: stats.connections_created.load(Ordering::Relaxed),
            connections_reused: stats.connections_reused.load(Ordering::Relaxed),
            connections_returned: stats.connections_returned.load(Ordering::Relaxed),
            connections_discarded: stats.connections_discarded.load(Ordering::Relaxed),
            idle_count: self.inner.idle.lock().values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    // Test implementation of Poolable
    struct TestConnection {
        id: u32,
        endpoint: String,
        closed: Arc<AtomicU32>,
    }

    #[derive(Clone, Default)]
    struct TestSettings {
        next_id: Arc<AtomicU32>,
        closed: Arc<AtomicU32>,
    }

    impl Poolable for TestConnection {
        type Settings = TestSettings;

        fn create(
            endpoint: &str,
            settings: &Self::Settings,
        ) -> impl Future<Output = Result<Self>> + Send {
            let conn = Self {
                id: settings.next_id.fetch_add(1, Ordering::Relaxed),
                endpoint: endpoint.to_string(),
                closed: Arc::clone(&settings.closed),
            };
            async move { Ok(conn) }
        }

        fn endpoint(&self) -> &str {
            &self.endpoint
        }

        fn disconnect(self) -> impl Future<Output = ()> + Send {
            self.closed.fetch_add(1, Ordering::Relaxed);
            async {}
        }
    }

    fn test_pool(max_idle: usize) -> (ConnectionPool<TestConnection>, TestSettings) {
        let settings = TestSettings::default();
        let pool = ConnectionPool::new(
            PoolConfig {
                max_idle_per_endpoint: max_idle,
            },
            settings.clone(),
        );
        (pool, settings)
    }

    #[tokio::test]
    async fn test_pool_reuses_connections() {
        let (pool, _) = test_pool(4);

        let conn = pool.get("10.0.0.1:9422").await.unwrap();
        let id = conn.id;
        pool.put(conn).await;

        let again = pool.get("10.0.0.1:9422").await.unwrap();
        assert_eq!(again.id, id);

        let stats = pool.stats();
        assert_eq!(stats.connections_created, 1);
        assert_eq!(stats.connections_reused, 1);
    }

    #[tokio::test]
    async fn test_pool_is_lifo() {
        let (pool, _) = test_pool(4);

        let a = pool.get("cs:1").await.unwrap();
        let b = pool.get("cs:1").await.unwrap();
        let (a_id, b_id) = (a.id, b.id);
        pool.put(a).await;
        pool.put(b).await;

        assert_eq!(pool.get("cs:1").await.unwrap().id, b_id);
        assert_eq!(pool.get("cs:1").await.unwrap().id, a_id);
    }

    #[tokio::test]
    async fn test_pool_keys_by_endpoint() {
        let (pool, _) = test_pool(4);

        let conn = pool.get("cs:1").await.unwrap();
        pool.put(conn).await;

        let other = pool.get("cs:2").await.unwrap();
        assert_eq!(other.endpoint(), "cs:2");
        assert_eq!(pool.idle_count("cs:1"), 1);
        assert_eq!(pool.stats().connections_created, 2);
    }

    #[tokio::test]
    async fn test_discarded_connection_not_reused() {
        let (pool, settings) = test_pool(4);

        let conn = pool.get("cs:1").await.unwrap();
        let id = conn.id;
        pool.discard(conn).await;

        assert_ne!(pool.get("cs:1").await.unwrap().id, id);
        assert_eq!(settings.closed.load(Ordering::Relaxed), 1);
        assert_eq!(pool.stats().connections_discarded, 1);
    }

    #[tokio::test]
    async fn test_put_beyond_limit_closes() {
        let (pool, settings) = test_pool(1);

        let a = pool.get("cs:1").await.unwrap();
        let b = pool.get("cs:1").await.unwrap();
        pool.put(a).await;
        pool.put(b).await;

        assert_eq!(pool.idle_count("cs:1"), 1);
        assert_eq!(settings.closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_pool() {
        let (pool, settings) = test_pool(4);

        for endpoint in ["cs:1", "cs:2", "cs:3"] {
            let conn = pool.get(endpoint).await.unwrap();
            pool.put(conn).await;
        }
        assert_eq!(pool.stats().idle_count, 3);

        pool.close_all().await;
        assert_eq!(pool.stats().idle_count, 0);
        assert_eq!(settings.closed.load(Ordering::Relaxed), 3);

        // Still usable afterwards.
        let conn = pool.get("cs:1").await.unwrap();
        assert_eq!(conn.endpoint(), "cs:1");
    }

    #[tokio::test]
    async fn test_pool_concurrent_access() {
        let (pool, _) = test_pool(8);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let conn = pool.get("cs:1").await.unwrap();
                tokio::task::yield_now().await;
                pool.put(conn).await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.connections_created + stats.connections_reused, 10);
        assert!(stats.idle_count <= 8);
    }
}
