//! Source adapters
//!
//! Each capture source hands over its own record shape; the normalizer
//! turns them into the single [`Event`] schema and rejects records that
//! lack a subject or actor before they reach the engine.

use crate::error::{Result, SentinelError};
use crate::types::{Event, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record from any capture source, tagged by `source`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RawEvent {
    Dns(DnsQuery),
    Syscall(SyscallRecord),
    Http(HttpRequest),
}

impl RawEvent {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            RawEvent::Dns(_) => SourceKind::Dns,
            RawEvent::Syscall(_) => SourceKind::Syscall,
            RawEvent::Http(_) => SourceKind::Http,
        }
    }

    /// Convert into a canonical event
    pub fn normalize(self) -> Result<Event> {
        match self {
            RawEvent::Dns(q) => Event::try_from(q),
            RawEvent::Syscall(s) => Event::try_from(s),
            RawEvent::Http(h) => Event::try_from(h),
        }
    }

    /// Parse one JSON line
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// DNS lookup seen on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsQuery {
    pub domain: Option<String>,
    /// Client address
    pub client: Option<String>,
    /// Record type (A, AAAA, TXT, ...)
    pub qtype: Option<String>,
    /// Unix millis
    pub timestamp: Option<u64>,
}

impl TryFrom<DnsQuery> for Event {
    type Error = SentinelError;

    fn try_from(q: DnsQuery) -> Result<Event> {
        let kind = SourceKind::Dns;
        let domain = required(kind, "domain", q.domain)?;
        let client = required(kind, "client", q.client)?;
        let domain = domain.trim_end_matches('.').to_string();

        let mut event = Event::dns(domain, client);
        if let Some(qtype) = present(q.qtype) {
            event = event.with_attribute("qtype", qtype.to_ascii_uppercase());
        }
        Ok(stamp(event, q.timestamp))
    }
}

/// Kernel-probe syscall record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyscallRecord {
    /// exec, unlink, connect or write
    pub operation: Option<String>,
    pub pid: Option<u32>,
    /// Process name
    pub comm: Option<String>,
    /// Command line for exec
    pub argv: Option<String>,
    /// Target path for unlink/write
    pub filename: Option<String>,
    /// Destination address for connect
    pub addr: Option<String>,
    pub port: Option<u16>,
    pub timestamp: Option<u64>,
}

impl TryFrom<SyscallRecord> for Event {
    type Error = SentinelError;

    fn try_from(r: SyscallRecord) -> Result<Event> {
        let kind = SourceKind::Syscall;
        let operation = required(kind, "operation", r.operation)?.to_ascii_lowercase();

        let subject = match operation.as_str() {
            "exec" | "execve" => required(kind, "argv", r.argv)?,
            "connect" => required(kind, "addr", r.addr)?,
            _ => required(kind, "filename", r.filename)?,
        };

        let comm = present(r.comm);
        let actor = match (r.pid, &comm) {
            (Some(pid), _) => format!("pid:{}", pid),
            (None, Some(comm)) => comm.clone(),
            (None, None) => {
                return Err(SentinelError::malformed(kind, "missing pid and comm"));
            }
        };

        let mut event = Event::new(kind, subject, actor).with_attribute("operation", operation);
        if let Some(comm) = comm {
            event = event.with_attribute("comm", comm);
        }
        if let Some(pid) = r.pid {
            event = event.with_attribute("pid", pid.to_string());
        }
        if let Some(port) = r.port {
            event = event.with_attribute("port", port.to_string());
        }
        Ok(stamp(event, r.timestamp))
    }
}

/// HTTP call seen by a gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    pub method: Option<String>,
    #[serde(alias = "uri", alias = "url")]
    pub path: Option<String>,
    pub host: Option<String>,
    pub body: Option<String>,
    #[serde(alias = "client_ip")]
    pub client: Option<String>,
    pub headers: HashMap<String, String>,
    pub timestamp: Option<u64>,
}

impl TryFrom<HttpRequest> for Event {
    type Error = SentinelError;

    fn try_from(r: HttpRequest) -> Result<Event> {
        let kind = SourceKind::Http;
        let method = required(kind, "method", r.method)?.to_ascii_uppercase();
        let path = required(kind, "path", r.path)?;
        let client = match present(r.client) {
            Some(client) => client,
            None => forwarded_for(&r.headers)
                .ok_or_else(|| SentinelError::malformed(kind, "missing client"))?,
        };

        let mut event = Event::new(kind, path, client).with_attribute("method", method);
        if let Some(host) = present(r.host) {
            event = event.with_attribute("host", host);
        }
        if let Some(body) = r.body.filter(|b| !b.is_empty()) {
            event = event.with_attribute("body", body);
        }
        Ok(stamp(event, r.timestamp))
    }
}

/// First hop from X-Forwarded-For, then X-Real-IP
fn forwarded_for(headers: &HashMap<String, String>) -> Option<String> {
    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header("x-real-ip"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(kind: SourceKind, field: &str, value: Option<String>) -> Result<String> {
    present(value).ok_or_else(|| SentinelError::malformed(kind, format!("missing {}", field)))
}

fn stamp(event: Event, timestamp: Option<u64>) -> Event {
    match timestamp {
        Some(ts) => event.with_timestamp(ts),
        None => event,
    }
}
