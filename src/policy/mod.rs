//! Central policy engine — the four-zone permission model.
//!
//! Zones:
//!   sandbox  — agent playground, full access
//!   identity — soul/config files, read ok, write needs approval
//!   system   — application code, read-only
//!   external — HTTP access, governed by method + URL rules
//!
//! The policy document is hot-reloadable; the shell deny list in [`deny`] is
//! compiled in and cannot be weakened by any reload. Policy is fail-closed:
//! a load error at startup is fatal, and a reload failure leaves the prior
//! configuration in place.

pub mod deny;
pub mod rate_limit;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, WardenError};
use crate::store::{Store, now_secs};
use rate_limit::MemoryWindow;

pub use deny::is_denied_command;

// ---------------------------------------------------------------------------
// Decision vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Sandbox,
    Identity,
    System,
    External,
    Unknown,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Identity => "identity",
            Self::System => "system",
            Self::External => "external",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Read,
    Write,
    Execute,
    HttpGet,
    HttpPost,
    HttpPut,
    HttpDelete,
    Shell,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::HttpGet => "http_get",
            Self::HttpPost => "http_post",
            Self::HttpPut => "http_put",
            Self::HttpDelete => "http_delete",
            Self::Shell => "shell",
        }
    }

    fn from_http_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::HttpGet,
            "PUT" => Self::HttpPut,
            "DELETE" => Self::HttpDelete,
            _ => Self::HttpPost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    RequiresApproval,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequiresApproval => "requires_approval",
        }
    }

    fn from_rule(rule: &str) -> Self {
        match rule {
            "allow" => Self::Allow,
            "requires_approval" => Self::RequiresApproval,
            _ => Self::Deny,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one policy check. Derived from configuration, never persisted.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub zone: Zone,
    pub action: ActionKind,
    pub risk_level: RiskLevel,
    pub reason: String,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

// ---------------------------------------------------------------------------
// Policy document
// ---------------------------------------------------------------------------

fn default_rule() -> String {
    "deny".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneRules {
    pub path: String,
    #[serde(default = "default_rule")]
    pub read: String,
    #[serde(default = "default_rule")]
    pub write: String,
    #[serde(default = "default_rule")]
    pub execute: String,
}

impl ZoneRules {
    fn rule_for(&self, action: ActionKind) -> &str {
        match action {
            ActionKind::Read => &self.read,
            ActionKind::Write => &self.write,
            ActionKind::Execute => &self.execute,
            _ => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitRule {
    pub max_calls: u32,
    pub window_seconds: u64,
}

const DEFAULT_RATE_LIMIT: RateLimitRule = RateLimitRule {
    max_calls: 30,
    window_seconds: 60,
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExternalAccess {
    pub http_get: Option<String>,
    pub http_post: Option<String>,
    pub http_put: Option<String>,
    pub http_delete: Option<String>,
    #[serde(default)]
    pub denied_url_patterns: Vec<String>,
}

impl ExternalAccess {
    fn rule_for(&self, action: ActionKind) -> &str {
        match action {
            ActionKind::HttpGet => self.http_get.as_deref().unwrap_or("allow"),
            ActionKind::HttpPost => self.http_post.as_deref().unwrap_or("requires_approval"),
            ActionKind::HttpPut => self.http_put.as_deref().unwrap_or("requires_approval"),
            ActionKind::HttpDelete => self.http_delete.as_deref().unwrap_or("requires_approval"),
            _ => "deny",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrchestratorRules {
    /// Overrides the built-in refusal-detection patterns when non-empty.
    #[serde(default)]
    pub refusal_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub zones: HashMap<String, ZoneRules>,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitRule>,
    #[serde(default)]
    pub external_access: ExternalAccess,
    #[serde(default)]
    pub orchestrator: OrchestratorRules,
}

/// Phrases that indicate the model declined tool use for lack of live
/// access. Used by the orchestrator's one-shot retry nudge; overridable via
/// `[orchestrator] refusal_patterns` in the policy document.
const DEFAULT_REFUSAL_PATTERNS: &[&str] = &[
    r"don.t have real.time",
    r"real.time capabilities",
    r"real.time access",
    r"training data",
    r"knowledge cutoff",
    r"can.t access the internet",
    r"cannot access the internet",
    r"no internet access",
    r"not able to browse",
    r"cannot browse",
    r"don.t have access to current",
];

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compiled form of the document, swapped atomically on reload.
struct PolicyState {
    config: PolicyConfig,
    /// Canonical zone prefixes, longest first for specificity.
    zone_paths: Vec<(PathBuf, Zone)>,
    denied_urls: Vec<Regex>,
    refusal: Arc<Vec<Regex>>,
}

pub struct PolicyEngine {
    path: PathBuf,
    state: RwLock<PolicyState>,
    memory_window: MemoryWindow,
    store: Option<Arc<Store>>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Load the policy document. Any error here is fatal — the runtime must
    /// not start without a policy.
    pub fn load(path: &Path, store: Option<Arc<Store>>) -> Result<Self> {
        let state = read_state(path)?;
        info!(path = %path.display(), zones = state.zone_paths.len(), "policy loaded");
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(state),
            memory_window: MemoryWindow::new(),
            store,
        })
    }

    /// Re-read the document. On any failure the previous configuration stays
    /// in place and the error is returned.
    pub fn reload(&self) -> Result<()> {
        let state = read_state(&self.path)?;
        info!(path = %self.path.display(), "policy reloaded");
        *self.state.write().unwrap() = state;
        Ok(())
    }

    // -- Zone resolution -----------------------------------------------------

    /// Map a filesystem path to its zone. The path is symlink-resolved so a
    /// link inside an allowed zone pointing outside resolves to Unknown.
    pub fn resolve_zone(&self, path: &Path) -> Zone {
        let real = canonicalize_lenient(path);
        let state = self.state.read().unwrap();
        for (zone_path, zone) in &state.zone_paths {
            if real.starts_with(zone_path) {
                return *zone;
            }
        }
        Zone::Unknown
    }

    // -- File access ---------------------------------------------------------

    pub fn check_file_access(&self, path: &Path, action: ActionKind) -> PolicyDecision {
        let zone = self.resolve_zone(path);
        if zone == Zone::Unknown {
            return PolicyDecision {
                decision: Decision::Deny,
                zone,
                action,
                risk_level: RiskLevel::High,
                reason: format!("Path {} is outside all known zones", path.display()),
            };
        }

        let state = self.state.read().unwrap();
        let rule = state
            .config
            .zones
            .get(zone.as_str())
            .map(|z| z.rule_for(action))
            .unwrap_or("deny");
        let decision = Decision::from_rule(rule);
        let risk_level = match decision {
            Decision::Allow => RiskLevel::Low,
            Decision::RequiresApproval => RiskLevel::Medium,
            Decision::Deny => RiskLevel::High,
        };
        PolicyDecision {
            decision,
            zone,
            action,
            risk_level,
            reason: format!("{} in {} zone: {}", action.as_str(), zone, rule),
        }
    }

    // -- Shell commands ------------------------------------------------------

    /// Deny-list first; the engine performs no further syntactic analysis.
    pub fn check_shell_command(&self, command: &str) -> PolicyDecision {
        if let Some(pattern) = deny::is_denied_command(command) {
            return PolicyDecision {
                decision: Decision::Deny,
                zone: Zone::System,
                action: ActionKind::Shell,
                risk_level: RiskLevel::Critical,
                reason: format!("Command matches deny pattern: {pattern}"),
            };
        }
        PolicyDecision {
            decision: Decision::Allow,
            zone: Zone::Sandbox,
            action: ActionKind::Shell,
            risk_level: RiskLevel::Low,
            reason: "Command not on deny list".to_string(),
        }
    }

    // -- HTTP access ---------------------------------------------------------

    pub fn check_http_access(&self, url: &str, method: &str) -> PolicyDecision {
        let action = ActionKind::from_http_method(method);
        let state = self.state.read().unwrap();

        for pattern in &state.denied_urls {
            if pattern.is_match(url) {
                return PolicyDecision {
                    decision: Decision::Deny,
                    zone: Zone::External,
                    action,
                    risk_level: RiskLevel::Critical,
                    reason: format!("URL matches denied pattern: {}", pattern.as_str()),
                };
            }
        }

        let rule = state.config.external_access.rule_for(action);
        let decision = Decision::from_rule(rule);
        let risk_level = if decision == Decision::Allow {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };
        PolicyDecision {
            decision,
            zone: Zone::External,
            action,
            risk_level,
            reason: format!("HTTP {}: {}", method.to_ascii_uppercase(), rule),
        }
    }

    // -- Rate limiting -------------------------------------------------------

    /// True when the call is within limits (and the call is recorded),
    /// false when rate-limited. Prefers the durable window so limits survive
    /// restarts; a store error falls back to the in-process window for that
    /// call.
    pub async fn check_rate_limit(&self, bucket: &str) -> bool {
        let rule = {
            let state = self.state.read().unwrap();
            state
                .config
                .rate_limits
                .get(bucket)
                .or_else(|| state.config.rate_limits.get("default"))
                .copied()
                .unwrap_or(DEFAULT_RATE_LIMIT)
        };
        let now = now_secs();

        if let Some(store) = &self.store {
            let key = format!("ratelimit:{bucket}");
            match store
                .window_admit(&key, now, rule.window_seconds, rule.max_calls)
                .await
            {
                Ok(admitted) => return admitted,
                Err(e) => {
                    warn!(bucket, err = %e, "durable rate-limit window failed, using in-process fallback");
                }
            }
        }
        self.memory_window
            .admit(bucket, rule.max_calls, rule.window_seconds, now)
    }

    // -- Orchestrator support ------------------------------------------------

    /// Compiled refusal-detection patterns (configured or built-in).
    pub fn refusal_patterns(&self) -> Arc<Vec<Regex>> {
        self.state.read().unwrap().refusal.clone()
    }
}

fn read_state(path: &Path) -> Result<PolicyState> {
    if !path.exists() {
        return Err(WardenError::Policy(format!(
            "policy document not found: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    let config: PolicyConfig = toml::from_str(&raw)
        .map_err(|e| WardenError::Policy(format!("policy parse failure: {e}")))?;
    build_state(config)
}

fn build_state(config: PolicyConfig) -> Result<PolicyState> {
    let zone_map = [
        ("sandbox", Zone::Sandbox),
        ("identity", Zone::Identity),
        ("system", Zone::System),
    ];
    let mut zone_paths = Vec::new();
    for (name, zone) in zone_map {
        if let Some(rules) = config.zones.get(name) {
            let path = PathBuf::from(&rules.path);
            zone_paths.push((canonicalize_lenient(&path), zone));
        }
    }
    // Longest prefix first so nested zones win over their parents.
    zone_paths.sort_by_key(|(p, _)| std::cmp::Reverse(p.as_os_str().len()));

    let denied_urls = config
        .external_access
        .denied_url_patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| WardenError::Policy(format!("bad denied_url_pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let refusal_sources: Vec<&str> = if config.orchestrator.refusal_patterns.is_empty() {
        DEFAULT_REFUSAL_PATTERNS.to_vec()
    } else {
        config
            .orchestrator
            .refusal_patterns
            .iter()
            .map(String::as_str)
            .collect()
    };
    let refusal = refusal_sources
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| WardenError::Policy(format!("bad refusal_pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PolicyState {
        config,
        zone_paths,
        denied_urls,
        refusal: Arc::new(refusal),
    })
}

/// Resolve symlinks even when the tail of the path does not exist yet: the
/// deepest existing ancestor is canonicalized and the remaining components
/// are re-applied. A path with no existing ancestor is returned as-is, which
/// matches no zone and therefore denies.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    let mut base = path.to_path_buf();
    loop {
        match base.canonicalize() {
            Ok(real) => {
                let mut out = real;
                for part in remainder.iter().rev() {
                    out.push(part);
                }
                return out;
            }
            Err(_) => match (base.parent(), base.file_name()) {
                (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                    remainder.push(name.to_os_string());
                    base = parent.to_path_buf();
                }
                _ => return path.to_path_buf(),
            },
        }
    }
}
