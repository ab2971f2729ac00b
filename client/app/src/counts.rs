//! # Counts cache
//!
//! Aggregate counts are expensive to compute remotely (one procedure call plus one exact count per
//! classification) and change only when the user votes. Each [`Scope`] keeps its last result for a
//! freshness window.
//!
//! ## Notes
//! - Every mutating vote operation asks with `force_refresh`, otherwise the stats bar lags behind.
//! - Two callers racing on a stale entry both fetch. The last write wins, both values are fresh.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use remote::{Backend, RemoteError, models::OptionCounts, models::Scope};
use tokio::sync::Mutex;
use tracing::debug;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    start: Instant,
    elapsed: StdMutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            elapsed: StdMutex::new(Duration::ZERO),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        self.start + *elapsed
    }
}

struct Entry {
    counts: OptionCounts,
    fetched_at: Instant,
}

pub struct CountsCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<Scope, Entry>>,
}

impl CountsCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(
        &self,
        backend: &dyn Backend,
        scope: &Scope,
        force_refresh: bool,
    ) -> Result<OptionCounts, RemoteError> {
        if !force_refresh {
            if let Some(counts) = self.fresh(scope).await {
                debug!("Counts cache hit for {}/{}", scope.user_id, scope.poll_id);
                return Ok(counts);
            }
        }

        let counts = backend.get_option_counts(scope).await?;

        self.entries.lock().await.insert(
            scope.clone(),
            Entry {
                counts,
                fetched_at: self.clock.now(),
            },
        );

        Ok(counts)
    }

    /// The cached value if it is still inside the freshness window.
    pub async fn fresh(&self, scope: &Scope) -> Option<OptionCounts> {
        let entries = self.entries.lock().await;
        let entry = entries.get(scope)?;

        (self.clock.now().duration_since(entry.fetched_at) < self.ttl).then_some(entry.counts)
    }

    pub async fn invalidate(&self, scope: &Scope) {
        self.entries.lock().await.remove(scope);
    }
}

#[cfg(test)]
mod tests {
    use remote::fake::FakeBackend;

    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn setup() -> (FakeBackend, Arc<ManualClock>, CountsCache) {
        let backend = FakeBackend::new().with_words(1, &["casa", "perro", "gato"]);
        let clock = Arc::new(ManualClock::default());
        let cache = CountsCache::with_clock(TTL, clock.clone());
        (backend, clock, cache)
    }

    #[tokio::test]
    async fn test_serves_fresh_entry() {
        let (backend, clock, cache) = setup();
        let scope = Scope::new("user-1", 1);

        let first = cache.get(&backend, &scope, false).await.unwrap();
        clock.advance(Duration::from_secs(299));
        let second = cache.get(&backend, &scope, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total, 3);
        assert_eq!(backend.calls("get_option_counts"), 1);
    }

    #[tokio::test]
    async fn test_expires_after_ttl() {
        let (backend, clock, cache) = setup();
        let scope = Scope::new("user-1", 1);

        cache.get(&backend, &scope, false).await.unwrap();
        clock.advance(TTL);
        cache.get(&backend, &scope, false).await.unwrap();

        assert_eq!(backend.calls("get_option_counts"), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_sees_new_vote() {
        let (backend, _, cache) = setup();
        let scope = Scope::new("user-1", 1);

        cache.get(&backend, &scope, false).await.unwrap();
        backend
            .submit_vote(&scope, 1, remote::models::Classification::Easy)
            .await
            .unwrap();

        let stale = cache.get(&backend, &scope, false).await.unwrap();
        let fresh = cache.get(&backend, &scope, true).await.unwrap();

        assert_eq!(stale.voted, 0);
        assert_eq!(fresh.voted, 1);
        assert_eq!(fresh.easy, 1);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (backend, _, cache) = setup();

        cache
            .get(&backend, &Scope::new("user-1", 1), false)
            .await
            .unwrap();
        cache
            .get(&backend, &Scope::new("user-2", 1), false)
            .await
            .unwrap();
        cache.invalidate(&Scope::new("user-1", 1)).await;

        assert!(cache.fresh(&Scope::new("user-1", 1)).await.is_none());
        assert!(cache.fresh(&Scope::new("user-2", 1)).await.is_some());
    }
}
