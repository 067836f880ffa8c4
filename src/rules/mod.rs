//! Blocking rule set.
//!
//! Four disjoint rule kinds: source IPs, destination ports, application
//! tags, and domains (exact entries plus `*.suffix` wildcards). Many worker
//! threads evaluate rules concurrently; insertions are rare and become
//! visible before the next frame a worker evaluates.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::{format_ip, parse_ip, AppTag};

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error("unknown application: {0}")]
    UnknownApp(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
}

/// Which rule kind produced a block verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Ip,
    Port,
    App,
    Domain,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Ip => write!(f, "IP"),
            RuleKind::Port => write!(f, "Port"),
            RuleKind::App => write!(f, "App"),
            RuleKind::Domain => write!(f, "Domain"),
        }
    }
}

/// A block verdict: the rule kind that fired and the offending detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReason {
    pub kind: RuleKind,
    pub detail: String,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.detail)
    }
}

#[derive(Debug, Default)]
struct RuleTables {
    blocked_ips: HashSet<u32>,
    blocked_ports: HashSet<u16>,
    blocked_apps: HashSet<AppTag>,
    blocked_domains: HashSet<String>,
    domain_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCounts {
    pub ips: usize,
    pub ports: usize,
    pub apps: usize,
    pub domains: usize,
}

/// Thread-shared rule set. Readers never block each other; the evaluator
/// sees one consistent snapshot per call.
#[derive(Debug, Default)]
pub struct RuleSet {
    tables: RwLock<RuleTables>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_ip(&self, ip: u32) {
        self.tables.write().blocked_ips.insert(ip);
        info!("rule: block source IP {}", format_ip(ip));
    }

    pub fn block_ip_str(&self, s: &str) -> Result<(), RuleError> {
        let ip = parse_ip(s).ok_or_else(|| RuleError::InvalidIp(s.to_string()))?;
        self.block_ip(ip);
        Ok(())
    }

    pub fn unblock_ip(&self, ip: u32) {
        self.tables.write().blocked_ips.remove(&ip);
    }

    pub fn block_port(&self, port: u16) {
        self.tables.write().blocked_ports.insert(port);
        info!("rule: block destination port {port}");
    }

    pub fn unblock_port(&self, port: u16) {
        self.tables.write().blocked_ports.remove(&port);
    }

    pub fn block_app(&self, app: AppTag) {
        self.tables.write().blocked_apps.insert(app);
        info!("rule: block application {app}");
    }

    pub fn block_app_str(&self, s: &str) -> Result<(), RuleError> {
        let app: AppTag = s
            .parse()
            .map_err(|_| RuleError::UnknownApp(s.to_string()))?;
        self.block_app(app);
        Ok(())
    }

    pub fn unblock_app(&self, app: AppTag) {
        self.tables.write().blocked_apps.remove(&app);
    }

    /// Insert a domain rule. Entries containing `*` are treated as
    /// wildcard patterns, everything else as a literal.
    pub fn block_domain(&self, domain: &str) {
        let lower = domain.to_ascii_lowercase();
        let mut tables = self.tables.write();
        if lower.contains('*') {
            if !tables.domain_patterns.contains(&lower) {
                tables.domain_patterns.push(lower);
            }
        } else {
            tables.blocked_domains.insert(lower);
        }
        info!("rule: block domain {domain}");
    }

    pub fn unblock_domain(&self, domain: &str) {
        let lower = domain.to_ascii_lowercase();
        let mut tables = self.tables.write();
        if lower.contains('*') {
            tables.domain_patterns.retain(|p| p != &lower);
        } else {
            tables.blocked_domains.remove(&lower);
        }
    }

    /// Evaluate a frame's attributes against the rule kinds in fixed order:
    /// IP, then port, then application, then domain. First hit wins.
    pub fn should_block(
        &self,
        src_ip: u32,
        dst_port: u16,
        app: AppTag,
        name: &str,
    ) -> Option<BlockReason> {
        let tables = self.tables.read();

        if tables.blocked_ips.contains(&src_ip) {
            return Some(BlockReason {
                kind: RuleKind::Ip,
                detail: format_ip(src_ip),
            });
        }

        if tables.blocked_ports.contains(&dst_port) {
            return Some(BlockReason {
                kind: RuleKind::Port,
                detail: dst_port.to_string(),
            });
        }

        if tables.blocked_apps.contains(&app) {
            return Some(BlockReason {
                kind: RuleKind::App,
                detail: app.to_string(),
            });
        }

        if !name.is_empty() {
            let lower = name.to_ascii_lowercase();
            if Self::domain_blocked(&tables, &lower) {
                return Some(BlockReason {
                    kind: RuleKind::Domain,
                    detail: lower,
                });
            }
        }

        None
    }

    fn domain_blocked(tables: &RuleTables, name: &str) -> bool {
        if tables.blocked_domains.contains(name) {
            return true;
        }
        if tables
            .domain_patterns
            .iter()
            .any(|p| wildcard_matches(name, p))
        {
            return true;
        }
        // Literal entries also match as substrings: blocking "tiktok"
        // must cover a DNS query for "tiktok.com".
        tables.blocked_domains.iter().any(|d| name.contains(d.as_str()))
    }

    pub fn counts(&self) -> RuleCounts {
        let tables = self.tables.read();
        RuleCounts {
            ips: tables.blocked_ips.len(),
            ports: tables.blocked_ports.len(),
            apps: tables.blocked_apps.len(),
            domains: tables.blocked_domains.len() + tables.domain_patterns.len(),
        }
    }

    pub fn clear(&self) {
        let mut tables = self.tables.write();
        *tables = RuleTables::default();
    }

    /// Load a line-oriented rule file with `[BLOCKED_IPS]`, `[BLOCKED_APPS]`,
    /// `[BLOCKED_DOMAINS]` and `[BLOCKED_PORTS]` sections. Blank lines are
    /// tolerated; unparseable values are logged and skipped. Returns the
    /// number of rules inserted.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, RuleError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut section = String::new();
        let mut inserted = 0usize;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                section = line.to_string();
                continue;
            }
            let ok = match section.as_str() {
                "[BLOCKED_IPS]" => self.block_ip_str(line).is_ok(),
                "[BLOCKED_APPS]" => self.block_app_str(line).is_ok(),
                "[BLOCKED_DOMAINS]" => {
                    self.block_domain(line);
                    true
                }
                "[BLOCKED_PORTS]" => match line.parse::<u16>() {
                    Ok(port) => {
                        self.block_port(port);
                        true
                    }
                    Err(_) => false,
                },
                _ => {
                    warn!("rule file {}: line outside a known section: {line}", path.display());
                    continue;
                }
            };
            if ok {
                inserted += 1;
            } else {
                warn!("rule file {}: skipping unparseable entry {line:?} in {section}", path.display());
            }
        }

        info!("loaded {inserted} rules from {}", path.display());
        Ok(inserted)
    }

    /// Write the current rules back out in the same section format.
    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RuleError> {
        let tables = self.tables.read();
        let mut out = fs::File::create(path.as_ref())?;

        writeln!(out, "[BLOCKED_IPS]")?;
        for ip in &tables.blocked_ips {
            writeln!(out, "{}", format_ip(*ip))?;
        }
        writeln!(out, "\n[BLOCKED_APPS]")?;
        for app in &tables.blocked_apps {
            writeln!(out, "{app}")?;
        }
        writeln!(out, "\n[BLOCKED_DOMAINS]")?;
        for domain in &tables.blocked_domains {
            writeln!(out, "{domain}")?;
        }
        for pattern in &tables.domain_patterns {
            writeln!(out, "{pattern}")?;
        }
        writeln!(out, "\n[BLOCKED_PORTS]")?;
        for port in &tables.blocked_ports {
            writeln!(out, "{port}")?;
        }
        Ok(())
    }
}

/// `*.suffix` matches both `host.suffix` and the bare `suffix`.
fn wildcard_matches(name: &str, pattern: &str) -> bool {
    if let Some(rest) = pattern.strip_prefix("*.") {
        let dotted = &pattern[1..]; // ".suffix"
        return name.ends_with(dotted) || name == rest;
    }
    false
}
