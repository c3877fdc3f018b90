//! Threat intel cache
//!
//! Memoizes reputation verdicts per subject for a fixed TTL. A miss goes
//! to the configured [`ReputationProvider`] under a deadline; concurrent
//! misses for the same subject all await one shared in-flight lookup and
//! receive its result, degraded or not. Timeouts and provider errors fail
//! open to a neutral degraded verdict, which is not cached.

use crate::clock::SharedClock;
use crate::config::{Live, ReputationConfig};
use crate::error::{Result, SentinelError};
use crate::types::ReputationResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Lookup = Shared<BoxFuture<'static, ReputationResult>>;

/// External reputation source
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Look up a normalized (lower-case, trimmed) subject
    async fn lookup(&self, subject: &str) -> Result<ReputationResult>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// TTL cache in front of a reputation provider
pub struct ThreatIntelCache {
    provider: Arc<dyn ReputationProvider>,
    entries: Arc<DashMap<String, ReputationResult>>,
    inflight: DashMap<String, (u64, Lookup)>,
    next_lookup: AtomicU64,
    config: Live<ReputationConfig>,
    clock: SharedClock,
}

/// Drops the in-flight slot it was issued for, even when the awaiting
/// caller is cancelled
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, (u64, Lookup)>,
    key: &'a str,
    id: u64,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.inflight.remove_if(self.key, |_, (id, _)| *id == self.id);
    }
}

impl ThreatIntelCache {
    pub fn new(
        provider: Arc<dyn ReputationProvider>,
        config: ReputationConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider,
            entries: Arc::new(DashMap::new()),
            inflight: DashMap::new(),
            next_lookup: AtomicU64::new(0),
            config: Live::new(config),
            clock,
        }
    }

    /// Current settings snapshot
    pub fn config(&self) -> Arc<ReputationConfig> {
        self.config.load()
    }

    /// Turn reputation checks on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.config.update(|c| c.enabled = enabled);
        tracing::info!(enabled, "Reputation checks toggled");
    }

    /// Reputation verdict for `subject`, served from cache while fresh
    pub async fn check(&self, subject: &str) -> ReputationResult {
        let key = subject.trim().to_lowercase();
        if let Some(hit) = self.fresh(&key) {
            tracing::debug!(subject = %key, "Reputation cache hit");
            return hit;
        }

        let (id, lookup) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(slot) => slot.get().clone(),
            Entry::Vacant(slot) => {
                // A lookup may have completed between the miss and here
                if let Some(hit) = self.fresh(&key) {
                    return hit;
                }
                let id = self.next_lookup.fetch_add(1, Ordering::Relaxed);
                let lookup = self.lookup(key.clone()).boxed().shared();
                slot.insert((id, lookup.clone()));
                (id, lookup)
            }
        };

        let _slot = InflightSlot {
            inflight: &self.inflight,
            key: &key,
            id,
        };
        lookup.await
    }

    /// Provider call under the deadline; caches successful verdicts
    fn lookup(&self, key: String) -> impl std::future::Future<Output = ReputationResult> + Send + 'static {
        let provider = self.provider.clone();
        let entries = self.entries.clone();
        let clock = self.clock.clone();
        let timeout = Duration::from_millis(self.config.load().timeout_ms);

        async move {
            let outcome = match tokio::time::timeout(timeout, provider.lookup(&key)).await {
                Ok(result) => result,
                Err(_) => Err(SentinelError::LookupTimeout(format!(
                    "{} did not answer for '{}' within {:?}",
                    provider.name(),
                    key,
                    timeout
                ))),
            };

            let now = clock.now_millis();
            match outcome {
                Ok(mut result) => {
                    result.fetched_at = now;
                    result.degraded = false;
                    tracing::debug!(
                        subject = %key,
                        provider = provider.name(),
                        threat = result.threat,
                        suspicious = result.suspicious,
                        "Reputation fetched"
                    );
                    entries.insert(key, result.clone());
                    result
                }
                Err(e) => {
                    tracing::warn!(
                        subject = %key,
                        provider = provider.name(),
                        error = %e,
                        confidence = "degraded",
                        "Reputation lookup failed, failing open"
                    );
                    ReputationResult::degraded(now)
                }
            }
        }
    }

    fn fresh(&self, key: &str) -> Option<ReputationResult> {
        let ttl = self.config.load().ttl_secs.saturating_mul(1000);
        let now = self.clock.now_millis();
        self.entries
            .get(key)
            .filter(|entry| now.saturating_sub(entry.fetched_at) < ttl)
            .map(|entry| entry.clone())
    }

    /// Drop one cached verdict
    pub fn invalidate(&self, subject: &str) -> bool {
        self.entries
            .remove(&subject.trim().to_lowercase())
            .is_some()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let ttl = self.config.load().ttl_secs.saturating_mul(1000);
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.fetched_at) < ttl);
        before - self.entries.len()
    }

    /// Number of cached verdicts, fresh or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-process provider backed by fixed threat and suspicious lists
///
/// Entries match by case-insensitive substring, like the static
/// classifier lists.
#[derive(Debug, Clone, Default)]
pub struct StaticReputationProvider {
    threats: HashMap<String, String>,
    suspicious: HashSet<String>,
}

impl StaticReputationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider serving the `threats` and `suspicious` lists of a config
    pub fn from_config(config: &ReputationConfig) -> Self {
        let provider = config
            .threats
            .iter()
            .fold(Self::new(), |p, t| p.with_threat(t.entry.trim(), t.category.clone()));
        config
            .suspicious
            .iter()
            .fold(provider, |p, entry| p.with_suspicious(entry.trim()))
    }

    /// Known-malicious entry with its category
    pub fn with_threat(mut self, entry: impl Into<String>, category: impl Into<String>) -> Self {
        self.threats
            .insert(entry.into().to_lowercase(), category.into());
        self
    }

    /// Flagged-but-unconfirmed entry
    pub fn with_suspicious(mut self, entry: impl Into<String>) -> Self {
        self.suspicious.insert(entry.into().to_lowercase());
        self
    }
}

#[async_trait]
impl ReputationProvider for StaticReputationProvider {
    async fn lookup(&self, subject: &str) -> Result<ReputationResult> {
        let subject = subject.to_lowercase();
        let mut result = ReputationResult::clean(0);
        result.sources = vec!["static".to_string()];

        if let Some((_, category)) = self
            .threats
            .iter()
            .find(|(entry, _)| subject.contains(entry.as_str()))
        {
            result.threat = true;
            result.category = category.clone();
            result.confidence = 0.9;
        } else if self.suspicious.iter().any(|e| subject.contains(e.as_str())) {
            result.suspicious = true;
            result.category = "suspicious".to_string();
            result.confidence = 0.5;
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; optionally slow or failing
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReputationProvider for CountingProvider {
        async fn lookup(&self, subject: &str) -> Result<ReputationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(SentinelError::LookupFailed(format!("feed down for {subject}")));
            }
            let mut result = ReputationResult::clean(0);
            result.suspicious = subject.contains("sus");
            Ok(result)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn cache(provider: Arc<CountingProvider>, clock: &ManualClock) -> ThreatIntelCache {
        ThreatIntelCache::new(provider, ReputationConfig::default(), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_one_lookup_within_ttl() {
        let clock = ManualClock::new(10_000);
        let provider = Arc::new(CountingProvider::new(Duration::ZERO));
        let cache = cache(provider.clone(), &clock);

        let first = cache.check("Example.com").await;
        clock.advance(Duration::from_secs(3599));
        let second = cache.check("example.com ").await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.fetched_at, 10_000);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_lookup_at_ttl_boundary() {
        let clock = ManualClock::new(10_000);
        let provider = Arc::new(CountingProvider::new(Duration::ZERO));
        let cache = cache(provider.clone(), &clock);

        cache.check("example.com").await;
        clock.advance(Duration::from_secs(3600));
        let refreshed = cache.check("example.com").await;

        assert_eq!(provider.calls(), 2);
        assert_eq!(refreshed.fetched_at, 3_610_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_lookup() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider::new(Duration::from_millis(200)));
        let cache = Arc::new(cache(provider.clone(), &clock));

        let checks = (0..10).map(|_| {
            let cache = cache.clone();
            async move { cache.check("sus.example.com").await }
        });
        let results = futures::future::join_all(checks).await;

        assert_eq!(provider.calls(), 1);
        assert!(results.iter().all(|r| r.suspicious));
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_open_and_is_not_cached() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider::new(Duration::from_secs(30)));
        let cache = cache(provider.clone(), &clock);

        let result = cache.check("slow.example.com").await;
        assert!(result.degraded);
        assert!(!result.threat);
        assert!(!result.suspicious);
        assert_eq!(result.confidence, 0.0);
        assert!(cache.is_empty());

        cache.check("slow.example.com").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_costs_waiters_one_timeout() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider::new(Duration::from_secs(30)));
        let cache = Arc::new(cache(provider.clone(), &clock));

        let started = tokio::time::Instant::now();
        let checks = (0..10).map(|_| {
            let cache = cache.clone();
            async move {
                let result = cache.check("slow.example.com").await;
                (result, started.elapsed())
            }
        });
        let results = futures::future::join_all(checks).await;

        assert_eq!(provider.calls(), 1);
        for (result, waited) in &results {
            assert!(result.degraded);
            assert_eq!(*waited, Duration::from_secs(5));
        }
        assert!(cache.inflight.is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_check_releases_inflight_slot() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider::new(Duration::from_secs(30)));
        let cache = Arc::new(cache(provider.clone(), &clock));

        let task = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.check("slow.example.com").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.inflight.len(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_fails_open() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..CountingProvider::new(Duration::ZERO)
        });
        let cache = cache(provider, &clock);

        let result = cache.check("down.example.com").await;
        assert!(result.degraded);
        assert_eq!(result.category, "unavailable");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let clock = ManualClock::new(0);
        let provider = Arc::new(CountingProvider::new(Duration::ZERO));
        let cache = cache(provider.clone(), &clock);

        cache.check("a.example.com").await;
        cache.check("b.example.com").await;
        assert!(cache.invalidate("A.example.com"));
        assert!(!cache.invalidate("a.example.com"));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticReputationProvider::new()
            .with_threat("c2-beacon.net", "C2")
            .with_suspicious("cheap-pills");

        let threat = provider.lookup("x.c2-beacon.net").await.unwrap();
        assert!(threat.threat);
        assert_eq!(threat.category, "C2");

        let sus = provider.lookup("cheap-pills.shop").await.unwrap();
        assert!(!sus.threat);
        assert!(sus.suspicious);

        let clean = provider.lookup("example.org").await.unwrap();
        assert!(!clean.threat && !clean.suspicious);
        assert_eq!(clean.sources, vec!["static".to_string()]);
    }

    #[tokio::test]
    async fn test_static_provider_from_config() {
        let config = ReputationConfig {
            threats: vec![crate::config::ThreatEntry {
                entry: "Beacon-Relay.net".to_string(),
                category: "C2".to_string(),
            }],
            suspicious: vec![" fresh-site ".to_string()],
            ..ReputationConfig::default()
        };
        let provider = StaticReputationProvider::from_config(&config);

        let threat = provider.lookup("cdn.beacon-relay.net").await.unwrap();
        assert!(threat.threat);
        assert_eq!(threat.category, "C2");
        assert!(provider.lookup("fresh-site.net").await.unwrap().suspicious);
    }
}
