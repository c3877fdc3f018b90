//! Kernel-probe syscall rules
//!
//! Rule table for events captured by a syscall probe. The event subject
//! holds the command line (exec) or target path (unlink, write); the
//! `operation`, `comm` and `port` attributes carry the rest.

use crate::config::{Live, SyscallPolicyConfig};
use crate::types::{Action, Event, RiskLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Directories whose appearance in an exec command line needs review
const SENSITIVE_EXEC_DIRS: &[&str] = &["/etc/", "/var/", "/usr/"];

/// Probed syscall family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyscallOp {
    Exec,
    Unlink,
    Connect,
    Write,
    Other,
}

impl SyscallOp {
    /// Parse a probe operation name (`execve` and `unlinkat` included)
    pub fn parse(s: &str) -> SyscallOp {
        match s.trim().to_ascii_lowercase().as_str() {
            "exec" | "execve" => SyscallOp::Exec,
            "unlink" | "unlinkat" => SyscallOp::Unlink,
            "connect" => SyscallOp::Connect,
            "write" => SyscallOp::Write,
            _ => SyscallOp::Other,
        }
    }
}

impl fmt::Display for SyscallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyscallOp::Exec => "exec",
            SyscallOp::Unlink => "unlink",
            SyscallOp::Connect => "connect",
            SyscallOp::Write => "write",
            SyscallOp::Other => "other",
        })
    }
}

/// Outcome of the syscall rule pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyscallFinding {
    pub operation: SyscallOp,
    pub action: Action,
    pub risk_level: RiskLevel,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl SyscallFinding {
    fn allow(operation: SyscallOp, reason: &str) -> Self {
        Self {
            operation,
            action: Action::Allow,
            risk_level: RiskLevel::Low,
            reason: reason.to_string(),
            suggestion: None,
        }
    }

    fn flag(
        operation: SyscallOp,
        action: Action,
        risk_level: RiskLevel,
        reason: String,
        suggestion: &str,
    ) -> Self {
        Self {
            operation,
            action,
            risk_level,
            reason,
            suggestion: Some(suggestion.to_string()),
        }
    }
}

/// Rule analyzer for syscall events
#[derive(Debug)]
pub struct SyscallPolicy {
    config: Live<SyscallPolicyConfig>,
}

impl SyscallPolicy {
    pub fn new(config: SyscallPolicyConfig) -> Self {
        Self {
            config: Live::new(config),
        }
    }

    pub fn config(&self) -> Arc<SyscallPolicyConfig> {
        self.config.load()
    }

    pub fn analyze(&self, event: &Event) -> SyscallFinding {
        let config = self.config.load();
        let op = SyscallOp::parse(event.attribute("operation").unwrap_or_default());
        match op {
            SyscallOp::Exec => analyze_exec(&config, &event.subject),
            SyscallOp::Unlink => analyze_unlink(&config, &event.subject),
            SyscallOp::Connect => {
                let port = event.attribute("port").and_then(|p| p.trim().parse::<u16>().ok());
                analyze_connect(&config, port)
            }
            SyscallOp::Write => {
                let comm = event.attribute("comm").unwrap_or(event.actor.as_str());
                analyze_write(&config, comm)
            }
            SyscallOp::Other => SyscallFinding::allow(op, "unrecognized syscall"),
        }
    }
}

fn analyze_exec(config: &SyscallPolicyConfig, argv: &str) -> SyscallFinding {
    if let Some(cmd) = config
        .dangerous_commands
        .iter()
        .find(|cmd| argv.contains(cmd.as_str()))
    {
        return SyscallFinding::flag(
            SyscallOp::Exec,
            Action::Block,
            RiskLevel::High,
            format!("dangerous command: {}", cmd),
            "may damage the host; requires human approval",
        );
    }
    if SENSITIVE_EXEC_DIRS.iter().any(|dir| argv.contains(dir)) {
        return SyscallFinding::flag(
            SyscallOp::Exec,
            Action::Review,
            RiskLevel::Medium,
            "command touches a system directory".to_string(),
            "confirm with an operator",
        );
    }
    SyscallFinding::allow(SyscallOp::Exec, "ordinary command")
}

fn analyze_unlink(config: &SyscallPolicyConfig, path: &str) -> SyscallFinding {
    if config
        .sensitive_paths
        .iter()
        .any(|root| path.starts_with(root.as_str()))
    {
        return SyscallFinding::flag(
            SyscallOp::Unlink,
            Action::Block,
            RiskLevel::High,
            format!("delete under system directory: {}", path),
            "system files must not be deleted",
        );
    }
    if path.contains(".log") && path.contains("/var/log/") {
        return SyscallFinding::flag(
            SyscallOp::Unlink,
            Action::Review,
            RiskLevel::Medium,
            format!("delete log file: {}", path),
            "confirm the deletion is needed",
        );
    }
    SyscallFinding::allow(SyscallOp::Unlink, "ordinary file delete")
}

fn analyze_connect(config: &SyscallPolicyConfig, port: Option<u16>) -> SyscallFinding {
    match port {
        Some(port) if config.sensitive_ports.contains(&port) => SyscallFinding::flag(
            SyscallOp::Connect,
            Action::Review,
            RiskLevel::High,
            format!("connect to sensitive port {} ({})", port, service_name(port)),
            "agent database access requires authorization",
        ),
        Some(80) | Some(443) => SyscallFinding::allow(SyscallOp::Connect, "web connection"),
        _ => SyscallFinding::allow(SyscallOp::Connect, "ordinary connection"),
    }
}

fn analyze_write(config: &SyscallPolicyConfig, comm: &str) -> SyscallFinding {
    let lowered = comm.to_lowercase();
    if config
        .agent_markers
        .iter()
        .any(|m| lowered.contains(&m.to_lowercase()))
    {
        return SyscallFinding::flag(
            SyscallOp::Write,
            Action::Review,
            RiskLevel::Medium,
            format!("agent process {} writing files", comm),
            "monitor agent file activity",
        );
    }
    SyscallFinding::allow(SyscallOp::Write, "ordinary write")
}

fn service_name(port: u16) -> &'static str {
    match port {
        22 => "SSH",
        3306 => "MySQL",
        5432 => "PostgreSQL",
        6379 => "Redis",
        27017 => "MongoDB",
        1433 => "SQL Server",
        _ => "unknown",
    }
}
