//! Trigger context supplied by the invoking host.

use serde::{Deserialize, Serialize};

/// Kind of event that started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Manual,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Manual => "manual",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            "manual" => Ok(EventKind::Manual),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// The ref and event that started the run.
///
/// Immutable for the run's lifetime; read by the expression evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub event: EventKind,
    /// Ref as supplied by the host, e.g. `main`, `refs/tags/v1.2.0`.
    pub ref_name: String,
}

impl TriggerContext {
    pub fn new(event: EventKind, ref_name: impl Into<String>) -> Self {
        Self {
            event,
            ref_name: ref_name.into(),
        }
    }

    /// Read the context from `GANTRY_EVENT` / `GANTRY_REF`.
    ///
    /// Defaults to a push of `main` when unset, so ad-hoc local runs
    /// work without ceremony.
    pub fn from_env() -> Self {
        let event = std::env::var("GANTRY_EVENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(EventKind::Push);
        let ref_name = std::env::var("GANTRY_REF").unwrap_or_else(|_| "main".to_string());
        Self { event, ref_name }
    }

    /// True when the ref is a tag (`refs/tags/...` prefix).
    pub fn is_tag(&self) -> bool {
        self.ref_name.starts_with("refs/tags/")
    }

    /// Ref with any `refs/heads/` or `refs/tags/` prefix stripped.
    pub fn short_ref(&self) -> &str {
        self.ref_name
            .strip_prefix("refs/tags/")
            .or_else(|| self.ref_name.strip_prefix("refs/heads/"))
            .unwrap_or(&self.ref_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_detection() {
        let ctx = TriggerContext::new(EventKind::Push, "refs/tags/v1.2.0");
        assert!(ctx.is_tag());
        assert_eq!(ctx.short_ref(), "v1.2.0");
    }

    #[test]
    fn test_branch_ref() {
        let ctx = TriggerContext::new(EventKind::Push, "refs/heads/main");
        assert!(!ctx.is_tag());
        assert_eq!(ctx.short_ref(), "main");
    }

    #[test]
    fn test_bare_ref_passes_through() {
        let ctx = TriggerContext::new(EventKind::PullRequest, "main");
        assert_eq!(ctx.short_ref(), "main");
    }
}
