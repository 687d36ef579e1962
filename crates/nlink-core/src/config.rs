//! Engine configuration, traversal policies, and parameter guards.
//!
//! Every computation takes its parameters explicitly.  There is no
//! process-wide "current N": callers build an [`EngineConfig`], validate it,
//! and hand the derived [`RuleParams`] to the decomposition stages.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{NLinkError, NLinkResult};

// Guards
pub const MAX_REDIRECT_HOP_LIMIT: u32 = 64;
pub const MAX_CHASE_HOPS: u32 = 1_000_000;
pub const MAX_TOP_K_BRANCHES: usize = 1000;

pub const DEFAULT_REDIRECT_HOP_LIMIT: u32 = 8;
pub const DEFAULT_COLLAPSE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_CHASE_HOPS: u32 = 50;
pub const DEFAULT_TOP_K_BRANCHES: usize = 5;

/// What to do when a page has fewer than N outgoing links.
///
/// A page with no links at all is a self-loop under every policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Follow the last available link.
    Clamp,
    /// Follow link `((N - 1) mod k) + 1`.
    Wrap,
    /// The page becomes its own successor.
    SelfLoop,
}

impl FallbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackPolicy::Clamp => "clamp",
            FallbackPolicy::Wrap => "wrap",
            FallbackPolicy::SelfLoop => "self_loop",
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = NLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clamp" => Ok(FallbackPolicy::Clamp),
            "wrap" => Ok(FallbackPolicy::Wrap),
            "self_loop" | "self-loop" | "selfloop" => Ok(FallbackPolicy::SelfLoop),
            other => Err(NLinkError::config(format!(
                "unknown fallback policy {other:?} (expected clamp, wrap or self_loop)"
            ))),
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How disambiguation pages are treated when chosen as a successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisambiguationPolicy {
    /// Substitute the page's first concrete link target.
    Skip,
    /// Treat it like any other page.
    Traverse,
}

impl DisambiguationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisambiguationPolicy::Skip => "skip",
            DisambiguationPolicy::Traverse => "traverse",
        }
    }
}

impl FromStr for DisambiguationPolicy {
    type Err = NLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(DisambiguationPolicy::Skip),
            "traverse" => Ok(DisambiguationPolicy::Traverse),
            other => Err(NLinkError::config(format!(
                "unknown disambiguation policy {other:?} (expected skip or traverse)"
            ))),
        }
    }
}

impl fmt::Display for DisambiguationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parameters that fully determine one functional graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleParams {
    pub n: u32,
    pub fallback: FallbackPolicy,
    pub redirect_hop_limit: u32,
    pub disambiguation: DisambiguationPolicy,
}

impl RuleParams {
    pub fn new(n: u32) -> Self {
        Self {
            n,
            fallback: FallbackPolicy::SelfLoop,
            redirect_hop_limit: DEFAULT_REDIRECT_HOP_LIMIT,
            disambiguation: DisambiguationPolicy::Traverse,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_disambiguation(mut self, disambiguation: DisambiguationPolicy) -> Self {
        self.disambiguation = disambiguation;
        self
    }

    pub fn with_redirect_hop_limit(mut self, limit: u32) -> Self {
        self.redirect_hop_limit = limit;
        self
    }

    /// Stable key for persisted rows and snapshot caches.
    pub fn tag(&self) -> String {
        format!(
            "n={};fallback={};redirects={};disambiguation={}",
            self.n, self.fallback, self.redirect_hop_limit, self.disambiguation
        )
    }

    pub fn validate(&self) -> NLinkResult<()> {
        if self.n == 0 {
            return Err(NLinkError::config("N must be a positive link rank"));
        }
        if self.redirect_hop_limit == 0 || self.redirect_hop_limit > MAX_REDIRECT_HOP_LIMIT {
            return Err(NLinkError::config(format!(
                "redirect_hop_limit must be in 1..={MAX_REDIRECT_HOP_LIMIT}, got {}",
                self.redirect_hop_limit
            )));
        }
        Ok(())
    }
}

fn default_n() -> u32 {
    1
}
fn default_fallback() -> FallbackPolicy {
    FallbackPolicy::SelfLoop
}
fn default_redirect_hop_limit() -> u32 {
    DEFAULT_REDIRECT_HOP_LIMIT
}
fn default_disambiguation() -> DisambiguationPolicy {
    DisambiguationPolicy::Traverse
}
fn default_collapse_threshold() -> f64 {
    DEFAULT_COLLAPSE_THRESHOLD
}
fn default_max_chase_hops() -> u32 {
    DEFAULT_MAX_CHASE_HOPS
}
fn default_top_k_branches() -> usize {
    DEFAULT_TOP_K_BRANCHES
}

/// Full configuration surface recognized by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default = "default_fallback")]
    pub fallback_policy: FallbackPolicy,
    #[serde(default = "default_redirect_hop_limit")]
    pub redirect_hop_limit: u32,
    #[serde(default = "default_disambiguation")]
    pub disambiguation_policy: DisambiguationPolicy,
    #[serde(default = "default_collapse_threshold")]
    pub collapse_threshold: f64,
    #[serde(default = "default_max_chase_hops")]
    pub max_chase_hops: u32,
    #[serde(default = "default_top_k_branches")]
    pub top_k_branches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n: default_n(),
            fallback_policy: default_fallback(),
            redirect_hop_limit: default_redirect_hop_limit(),
            disambiguation_policy: default_disambiguation(),
            collapse_threshold: default_collapse_threshold(),
            max_chase_hops: default_max_chase_hops(),
            top_k_branches: default_top_k_branches(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.  Any malformed field, including an
    /// unknown policy name, is reported as a configuration error.
    pub fn from_json_str(raw: &str) -> NLinkResult<Self> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| NLinkError::config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> NLinkResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn rule(&self) -> RuleParams {
        RuleParams {
            n: self.n,
            fallback: self.fallback_policy,
            redirect_hop_limit: self.redirect_hop_limit,
            disambiguation: self.disambiguation_policy,
        }
    }

    /// Copy of this config targeting a different N.
    pub fn with_n(&self, n: u32) -> Self {
        Self { n, ..self.clone() }
    }

    pub fn validate(&self) -> NLinkResult<()> {
        self.rule().validate()?;
        validate_threshold(self.collapse_threshold)?;
        if self.max_chase_hops > MAX_CHASE_HOPS {
            return Err(NLinkError::config(format!(
                "max_chase_hops must be at most {MAX_CHASE_HOPS}, got {}",
                self.max_chase_hops
            )));
        }
        if self.top_k_branches == 0 || self.top_k_branches > MAX_TOP_K_BRANCHES {
            return Err(NLinkError::config(format!(
                "top_k_branches must be in 1..={MAX_TOP_K_BRANCHES}, got {}",
                self.top_k_branches
            )));
        }
        Ok(())
    }
}

/// Collapse thresholds live in the open interval (0, 1).
pub fn validate_threshold(threshold: f64) -> NLinkResult<()> {
    if threshold.is_finite() && threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(NLinkError::config(format!(
            "collapse_threshold must be in (0, 1), got {threshold}"
        )))
    }
}
