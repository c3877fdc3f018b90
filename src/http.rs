//! HTTP request risk assessment
//!
//! Two stages: a fast weighted rule pass over method, path, body and
//! host, then an advisory intent analysis from an external model. The
//! two scores are blended (rule share from config, 60% by default) and
//! thresholded into a verdict.

use crate::config::{HttpPolicyConfig, Live};
use crate::error::{Result, SentinelError};
use crate::types::{Action, Event, RiskLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const METHOD_WEIGHT: u32 = 30;
const PATH_WEIGHT: u32 = 40;
const KEYWORD_WEIGHT: u32 = 30;
const PRODUCTION_WEIGHT: u32 = 20;

const BLOCK_SCORE: u32 = 90;
const REVIEW_SCORE: u32 = 70;

/// Body bytes forwarded to the intent model
const PROMPT_BODY_LIMIT: usize = 200;

/// The parts of an HTTP call the assessors look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSummary {
    pub method: String,
    pub path: String,
    pub host: String,
    pub body: String,
    pub client: String,
}

impl HttpSummary {
    /// Read an HTTP-shaped event: subject is the path, method/host/body
    /// come from attributes
    pub fn from_event(event: &Event) -> Self {
        Self {
            method: event
                .attribute("method")
                .unwrap_or("GET")
                .trim()
                .to_ascii_uppercase(),
            path: event.subject.clone(),
            host: event.attribute("host").unwrap_or_default().to_string(),
            body: event.attribute("body").unwrap_or_default().to_string(),
            client: event.actor.clone(),
        }
    }
}

/// Result of the rule pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScore {
    pub score: u32,
    pub level: RiskLevel,
    pub violations: Vec<String>,
}

/// Advisory intent classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAssessment {
    pub intent: String,
    pub impact: String,
    pub risk_level: RiskLevel,
    pub suggestion: String,
    /// Fallback used because the analyzer failed or timed out
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl IntentAssessment {
    /// Neutral fail-open advisory
    pub fn degraded() -> Self {
        Self {
            intent: "analysis unavailable".to_string(),
            impact: "rule engine only".to_string(),
            risk_level: RiskLevel::Medium,
            suggestion: "check the intent analyzer".to_string(),
            degraded: true,
        }
    }

    /// Score contributed to the blend
    pub fn score(&self) -> u32 {
        advisory_score(self.risk_level)
    }
}

/// Full record of an HTTP assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAssessment {
    pub rule: RuleScore,
    pub advisory: IntentAssessment,
    pub advisory_score: u32,
    pub final_score: u32,
    pub action: Action,
    pub risk_level: RiskLevel,
}

/// External intent classifier
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    async fn analyze(&self, request: &HttpSummary) -> Result<IntentAssessment>;

    fn name(&self) -> &str;
}

/// Rule pass plus advisory blend
pub struct HttpPolicy {
    config: Live<HttpPolicyConfig>,
    analyzer: Arc<dyn IntentAnalyzer>,
}

impl HttpPolicy {
    pub fn new(config: HttpPolicyConfig, analyzer: Arc<dyn IntentAnalyzer>) -> Self {
        Self {
            config: Live::new(config),
            analyzer,
        }
    }

    /// Policy with the analyzer the config asks for
    pub fn from_config(config: HttpPolicyConfig) -> Result<Self> {
        let analyzer: Arc<dyn IntentAnalyzer> = match &config.ollama_url {
            Some(url) => Arc::new(OllamaIntentAnalyzer::new(url, &config.ollama_model)?),
            None => Arc::new(RuleOnlyAnalyzer),
        };
        Ok(Self::new(config, analyzer))
    }

    pub fn config(&self) -> Arc<HttpPolicyConfig> {
        self.config.load()
    }

    /// Rule pass only
    pub fn score_rules(&self, request: &HttpSummary) -> RuleScore {
        score_rules(&self.config.load(), request)
    }

    pub async fn assess(&self, event: &Event) -> HttpAssessment {
        let config = self.config.load();
        let request = HttpSummary::from_event(event);
        let rule = score_rules(&config, &request);

        let timeout = Duration::from_millis(config.advisory_timeout_ms);
        let advisory = match tokio::time::timeout(timeout, self.analyzer.analyze(&request)).await {
            Ok(Ok(advisory)) => advisory,
            Ok(Err(e)) => {
                tracing::warn!(
                    analyzer = self.analyzer.name(),
                    path = %request.path,
                    error = %e,
                    confidence = "degraded",
                    "Intent analysis failed, failing open"
                );
                IntentAssessment::degraded()
            }
            Err(_) => {
                tracing::warn!(
                    analyzer = self.analyzer.name(),
                    path = %request.path,
                    timeout_ms = config.advisory_timeout_ms,
                    confidence = "degraded",
                    "Intent analysis timed out, failing open"
                );
                IntentAssessment::degraded()
            }
        };

        let advisory_score = advisory.score();
        let final_score = blend(rule.score, advisory_score, config.rule_weight);
        let (action, risk_level) = if final_score >= BLOCK_SCORE {
            (Action::Block, RiskLevel::Critical)
        } else if final_score >= REVIEW_SCORE {
            (Action::Review, RiskLevel::High)
        } else {
            (Action::Allow, advisory.risk_level)
        };

        tracing::debug!(
            rule_score = rule.score,
            advisory_score,
            final_score,
            action = %action,
            "HTTP request assessed"
        );

        HttpAssessment {
            rule,
            advisory,
            advisory_score,
            final_score,
            action,
            risk_level,
        }
    }
}

/// Weighted rule score for one request
pub fn score_rules(config: &HttpPolicyConfig, request: &HttpSummary) -> RuleScore {
    let mut score = 0;
    let mut violations = Vec::new();

    if config
        .dangerous_methods
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        score += METHOD_WEIGHT;
        violations.push(format!("dangerous method: {}", request.method));
    }

    let path = request.path.to_lowercase();
    for p in config.dangerous_paths.iter().filter(|p| path.contains(&p.to_lowercase())) {
        score += PATH_WEIGHT;
        violations.push(format!("dangerous path: {}", p));
    }

    let body = request.body.to_lowercase();
    for k in config.dangerous_keywords.iter().filter(|k| body.contains(&k.to_lowercase())) {
        score += KEYWORD_WEIGHT;
        violations.push(format!("dangerous keyword: {}", k));
    }

    let host = request.host.to_lowercase();
    for i in config
        .production_indicators
        .iter()
        .filter(|i| host.contains(&i.to_lowercase()))
    {
        score += PRODUCTION_WEIGHT;
        violations.push(format!("production host: {}", i));
    }

    RuleScore {
        score,
        level: rule_level(score),
        violations,
    }
}

/// Rule score → level
pub fn rule_level(score: u32) -> RiskLevel {
    match score {
        s if s >= 90 => RiskLevel::Critical,
        s if s >= 70 => RiskLevel::High,
        s if s >= 30 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Advisory level → score
pub fn advisory_score(level: RiskLevel) -> u32 {
    match level {
        RiskLevel::Low => 10,
        RiskLevel::Medium => 50,
        RiskLevel::High => 80,
        RiskLevel::Critical => 100,
    }
}

/// Truncated weighted blend, computed in whole percent
fn blend(rule: u32, advisory: u32, rule_weight: f64) -> u32 {
    let rule_pct = (rule_weight.clamp(0.0, 1.0) * 100.0).round() as u32;
    (rule * rule_pct + advisory * (100 - rule_pct)) / 100
}

/// Heuristic analyzer used when no model is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleOnlyAnalyzer;

#[async_trait]
impl IntentAnalyzer for RuleOnlyAnalyzer {
    async fn analyze(&self, request: &HttpSummary) -> Result<IntentAssessment> {
        let (intent, impact, risk_level, suggestion) = if request.method == "DELETE" {
            ("delete data", "data cannot be recovered", RiskLevel::High, "requires approval")
        } else if request.path.contains("production") {
            ("operate on production", "may affect the business", RiskLevel::High, "requires approval")
        } else {
            ("modify data", "moderate risk", RiskLevel::Medium, "approval recommended")
        };
        Ok(IntentAssessment {
            intent: intent.to_string(),
            impact: impact.to_string(),
            risk_level,
            suggestion: suggestion.to_string(),
            degraded: false,
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// Intent analysis through an Ollama `/api/generate` endpoint
pub struct OllamaIntentAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct IntentReply {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    impact: String,
    #[serde(default)]
    risk_level: String,
    #[serde(default)]
    suggestion: String,
}

impl OllamaIntentAnalyzer {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(SentinelError::Config("ollama_url is empty".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/generate", base),
            model: model.to_string(),
        })
    }

    fn prompt(request: &HttpSummary) -> String {
        let body: String = request.body.chars().take(PROMPT_BODY_LIMIT).collect();
        format!(
            "You are a security analyst. Assess this HTTP request.\n\n\
             Method: {}\nURL: {}\nHost: {}\nClient: {}\nBody: {}\n\n\
             Reply with JSON only: {{\"intent\": \"...\", \"impact\": \"...\", \
             \"risk_level\": \"LOW|MEDIUM|HIGH|CRITICAL\", \"suggestion\": \"...\"}}",
            request.method, request.path, request.host, request.client, body
        )
    }
}

/// Parse the model's JSON reply; unknown levels read as MEDIUM
pub fn parse_intent_reply(text: &str) -> Result<IntentAssessment> {
    let reply: IntentReply = serde_json::from_str(text.trim())?;
    Ok(IntentAssessment {
        intent: reply.intent,
        impact: reply.impact,
        risk_level: RiskLevel::parse(&reply.risk_level).unwrap_or(RiskLevel::Medium),
        suggestion: reply.suggestion,
        degraded: false,
    })
}

#[async_trait]
impl IntentAnalyzer for OllamaIntentAnalyzer {
    async fn analyze(&self, request: &HttpSummary) -> Result<IntentAssessment> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(request),
            stream: false,
            format: "json",
        };
        let response: GenerateResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if response.response.trim().is_empty() {
            return Err(SentinelError::LookupFailed(format!(
                "{} returned an empty response",
                self.endpoint
            )));
        }
        parse_intent_reply(&response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
