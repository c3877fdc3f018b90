//! Tunneling detection
//!
//! Keeps one time-ordered queue of lookup timestamps per
//! (actor, first label) key, bounded to the trailing window. A subject is
//! reported as tunneling when any of three independent checks fires:
//! query rate above the per-window limit, subdomain depth above the
//! limit, or a long alphabetic payload drawn only from the base64
//! alphabet.

use crate::clock::SharedClock;
use crate::config::{Live, TunnelConfig};
use crate::types::TunnelReport;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Per-key sliding-window tunnel detector
pub struct TunnelDetector {
    /// key → ascending timestamps (ms) inside the trailing window
    windows: DashMap<String, VecDeque<u64>>,
    config: Live<TunnelConfig>,
    clock: SharedClock,
}

impl TunnelDetector {
    pub fn new(config: TunnelConfig, clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            config: Live::new(config),
            clock,
        }
    }

    /// Current settings snapshot
    pub fn config(&self) -> Arc<TunnelConfig> {
        self.config.load()
    }

    /// Change the per-window query limit
    pub fn set_max_queries(&self, max_queries: usize) {
        self.config.update(|c| c.max_queries_per_minute = max_queries);
        tracing::info!(max_queries, "Tunnel rate threshold updated");
    }

    /// Change the window length; takes effect on the next record per key
    pub fn set_window_secs(&self, window_secs: u64) {
        self.config.update(|c| c.window_secs = window_secs);
        tracing::info!(window_secs, "Tunnel window updated");
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.config.update(|c| c.enabled = enabled);
        tracing::info!(enabled, "Tunnel checks toggled");
    }

    /// Record a lookup at the current time
    pub fn record(&self, actor: &str, subject: &str) -> bool {
        self.record_at(actor, subject, self.clock.now_millis())
    }

    /// Record a lookup observed at `at` (Unix millis)
    ///
    /// Arrivals older than the key's current window are discarded and
    /// `false` is returned; late arrivals inside the window are inserted
    /// in order.
    pub fn record_at(&self, actor: &str, subject: &str, at: u64) -> bool {
        let window = self.config.load().window_millis();
        let key = window_key(actor, subject);
        let mut queue = self.windows.entry(key).or_default();

        let latest = queue.back().map_or(at, |&last| last.max(at));
        let cutoff = latest.saturating_sub(window);
        if at < cutoff {
            tracing::debug!(actor, subject, at, cutoff, "Discarded stale tunnel sample");
            return false;
        }

        match queue.back() {
            Some(&last) if last > at => {
                let pos = queue.partition_point(|&t| t <= at);
                queue.insert(pos, at);
            }
            _ => queue.push_back(at),
        }

        while queue.front().is_some_and(|&t| t < cutoff) {
            queue.pop_front();
        }

        debug_assert!(
            queue.iter().zip(queue.iter().skip(1)).all(|(a, b)| a <= b),
            "tunnel window out of order"
        );
        true
    }

    /// Evaluate the three tunnel heuristics for a subject
    pub fn detect_tunnel(&self, actor: &str, subject: &str) -> TunnelReport {
        let config = self.config.load();
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(config.window_millis());

        let query_count = self
            .windows
            .get(&window_key(actor, subject))
            .map_or(0, |queue| queue.len() - queue.partition_point(|&t| t < cutoff));

        let subdomain_depth = subdomain_depth(subject);
        let rate_exceeded = query_count > config.max_queries_per_minute;
        let too_deep = subdomain_depth > config.max_subdomain_depth;
        let encoded = looks_encoded(subject, config.min_encoded_len);

        TunnelReport {
            is_tunnel: rate_exceeded || too_deep || encoded,
            query_count,
            max_allowed: config.max_queries_per_minute,
            subdomain_depth,
            rate_exceeded,
            too_deep,
            encoded,
        }
    }

    /// Number of keys seen so far
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn window_key(actor: &str, subject: &str) -> String {
    let root = subject.split('.').next().unwrap_or_default();
    format!("{}:{}", actor, root)
}

/// Label count minus two (registrable name + TLD)
pub fn subdomain_depth(subject: &str) -> usize {
    subject.split('.').count().saturating_sub(2)
}

/// Alphabetic content is all base64 alphabet and longer than `min_len`
fn looks_encoded(subject: &str, min_len: usize) -> bool {
    let mut count = 0usize;
    for c in subject.chars().filter(|c| c.is_alphabetic()) {
        if !(c.is_ascii_alphanumeric() || c == '+' || c == '/') {
            return false;
        }
        count += 1;
    }
    count > min_len
}
