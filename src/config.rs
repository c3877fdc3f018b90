//! Sentinel configuration
//!
//! Every section implements `Default` and deserializes with
//! `#[serde(default)]`, so a config file only needs the keys it changes.
//! Values the administrative surface may change at runtime are held in
//! [`Live`] cells by the components that read them.

use crate::error::{Result, SentinelError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub classifier: ClassifierConfig,
    pub reputation: ReputationConfig,
    pub dga: DgaConfig,
    pub tunnel: TunnelConfig,
    pub http: HttpPolicyConfig,
    pub syscall: SyscallPolicyConfig,
    pub audit: AuditConfig,
    pub approval: ApprovalConfig,
}

/// Curated allow/deny substrings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            allow: to_strings(&[
                "google.com",
                "microsoft.com",
                "apple.com",
                "amazon.com",
                "cloudflare.com",
                "github.com",
                "docker.io",
                "docker.com",
                "kubernetes.io",
                "ollama.ai",
                "huggingface.co",
                "openai.com",
                "python.org",
                "pypi.org",
                "npmjs.com",
                "npmjs.org",
                "golang.org",
            ]),
            deny: to_strings(&[
                "malicious-domain.com",
                "phishing-site.net",
                "c2-server.bad",
                "crypto-mining.pool",
            ]),
        }
    }
}

/// Threat intel cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub enabled: bool,
    /// Cache entry lifetime
    pub ttl_secs: u64,
    /// Per-lookup deadline
    pub timeout_ms: u64,
    /// Known-malicious entries served by the in-process provider
    pub threats: Vec<ThreatEntry>,
    /// Flagged-but-unconfirmed entries served by the in-process provider
    pub suspicious: Vec<String>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            timeout_ms: 5000,
            threats: Vec::new(),
            suspicious: Vec::new(),
        }
    }
}

/// One known-malicious substring and its threat category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatEntry {
    pub entry: String,
    pub category: String,
}

/// DGA detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DgaConfig {
    pub enabled: bool,
    pub threshold: f64,
}

impl Default for DgaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
        }
    }
}

/// Tunnel detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub enabled: bool,
    /// Queries allowed per key inside one window
    pub max_queries_per_minute: usize,
    pub window_secs: u64,
    /// Depth above which a name is treated as tunneling
    pub max_subdomain_depth: usize,
    /// Alphabetic length above which an encoded-looking name is flagged
    pub min_encoded_len: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queries_per_minute: 50,
            window_secs: 60,
            max_subdomain_depth: 5,
            min_encoded_len: 20,
        }
    }
}

impl TunnelConfig {
    pub fn window_millis(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }
}

/// HTTP rule scorer and advisory blend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpPolicyConfig {
    pub dangerous_methods: Vec<String>,
    pub dangerous_paths: Vec<String>,
    pub dangerous_keywords: Vec<String>,
    pub production_indicators: Vec<String>,
    /// Share of the final score taken from the rule pass
    pub rule_weight: f64,
    pub advisory_timeout_ms: u64,
    /// Ollama endpoint for intent analysis; none uses the rule-only analyzer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,
    pub ollama_model: String,
}

impl Default for HttpPolicyConfig {
    fn default() -> Self {
        Self {
            dangerous_methods: to_strings(&["DELETE", "PUT", "PATCH", "POST"]),
            dangerous_paths: to_strings(&["/delete", "/remove", "/drop", "/destroy", "/clear"]),
            dangerous_keywords: to_strings(&["delete", "drop", "truncate", "remove", "destroy"]),
            production_indicators: to_strings(&["prod", "production", "live", "master"]),
            rule_weight: 0.6,
            advisory_timeout_ms: 5000,
            ollama_url: None,
            ollama_model: "qwen2.5:7b".to_string(),
        }
    }
}

/// Kernel-probe rule settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyscallPolicyConfig {
    pub dangerous_commands: Vec<String>,
    pub sensitive_paths: Vec<String>,
    pub sensitive_ports: Vec<u16>,
    /// Process-name fragments that identify an AI agent
    pub agent_markers: Vec<String>,
}

impl Default for SyscallPolicyConfig {
    fn default() -> Self {
        Self {
            dangerous_commands: to_strings(&[
                "rm -rf",
                "rm -r",
                "dd if=",
                "mkfs",
                "chmod 777",
                "chown root",
                ":(){ :|:& };:",
                "kill -9",
                "reboot",
                "shutdown",
            ]),
            sensitive_paths: to_strings(&["/etc", "/var", "/usr", "/home", "/root", "/boot", "/sys"]),
            sensitive_ports: vec![22, 3306, 5432, 6379, 27017, 1433],
            agent_markers: to_strings(&["agent", "ai"]),
        }
    }
}

/// Audit sink settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSONL file; none keeps records in memory only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub memory_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            memory_capacity: 10_000,
        }
    }
}

/// Approval workflow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Broadcast buffer for lifecycle notices
    pub notify_capacity: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            notify_capacity: 256,
        }
    }
}

impl SentinelConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: SentinelConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text)?,
            other => {
                return Err(SentinelError::Config(format!(
                    "Unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dga.threshold) {
            return Err(SentinelError::Config(format!(
                "dga.threshold must be within [0, 1], got {}",
                self.dga.threshold
            )));
        }
        if self.tunnel.window_secs == 0 {
            return Err(SentinelError::Config(
                "tunnel.window_secs must be > 0".to_string(),
            ));
        }
        if self.tunnel.max_queries_per_minute == 0 {
            return Err(SentinelError::Config(
                "tunnel.max_queries_per_minute must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.http.rule_weight) {
            return Err(SentinelError::Config(format!(
                "http.rule_weight must be within [0, 1], got {}",
                self.http.rule_weight
            )));
        }
        if self.reputation.timeout_ms == 0 || self.http.advisory_timeout_ms == 0 {
            return Err(SentinelError::Config(
                "lookup timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-copy-update cell for runtime-adjustable settings
///
/// Readers take an `Arc` snapshot and never observe a half-applied
/// update; writers clone, modify and swap the whole value.
#[derive(Debug)]
pub struct Live<T> {
    inner: RwLock<Arc<T>>,
}

impl<T: Clone> Live<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<T> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to a copy and publish it
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Arc<T> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = T::clone(&guard);
        f(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    /// Replace the whole value
    pub fn store(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
    }
}

impl<T: Clone + Default> Default for Live<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
