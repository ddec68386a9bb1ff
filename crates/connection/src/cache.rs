//! Short-lived memo of connection verdicts.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use craftlink_protocol::ConnectionState;

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    state: ConnectionState,
    captured: Instant,
}

/// TTL map from a string key (e.g. `"console_connected"`) to the last
/// observed [`ConnectionState`].
///
/// Expired entries are dropped lazily on read.
pub struct StatusCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedStatus>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached state if it is younger than the TTL.
    pub async fn get(&self, key: &str) -> Option<ConnectionState> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.captured.elapsed() < self.ttl => Some(entry.state),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: &str, state: ConnectionState) {
        self.entries.lock().await.insert(
            key.to_string(),
            CachedStatus {
                state,
                captured: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = StatusCache::new(Duration::from_secs(5));
        cache.set("console_connected", ConnectionState::Connected).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            cache.get("console_connected").await,
            Some(ConnectionState::Connected)
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("console_connected").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let cache = StatusCache::new(Duration::from_secs(5));
        cache.set("a", ConnectionState::Connected).await;
        cache.set("b", ConnectionState::Disconnected).await;
        assert_eq!(cache.len().await, 2);

        cache.invalidate("a").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(ConnectionState::Disconnected));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let cache = StatusCache::new(Duration::from_secs(5));
        cache.set("a", ConnectionState::Connected).await;
        cache.set("a", ConnectionState::Error).await;
        assert_eq!(cache.get("a").await, Some(ConnectionState::Error));
    }
}
