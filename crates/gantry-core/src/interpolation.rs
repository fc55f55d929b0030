//! Variable interpolation for scripts, env values, and artifact names.

use crate::trigger::TriggerContext;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid regex"))
}

/// Context for `${{ ... }}` substitution.
///
/// Supports:
/// - `${{ matrix.key }}` - matrix axis value for the current instance
/// - `${{ env.VAR }}` - pipeline/job env, falling back to the process
/// - `${{ ref }}` / `${{ event }}` - trigger context
///
/// Missing keys resolve to the empty string; gating on missing context
/// belongs in conditions, not interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    pub matrix: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub ref_name: Option<String>,
    pub event: Option<String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(mut self, trigger: &TriggerContext) -> Self {
        self.ref_name = Some(trigger.short_ref().to_string());
        self.event = Some(trigger.event.as_str().to_string());
        self
    }

    /// Replace every placeholder in `input`.
    pub fn interpolate(&self, input: &str) -> String {
        placeholder_re()
            .replace_all(input, |caps: &regex::Captures| {
                self.resolve(caps.get(1).map_or("", |m| m.as_str()).trim())
            })
            .to_string()
    }

    fn resolve(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }
        if let Some(var) = expr.strip_prefix("env.") {
            return self
                .env
                .get(var)
                .cloned()
                .or_else(|| std::env::var(var).ok())
                .unwrap_or_default();
        }
        match expr {
            "ref" => self.ref_name.clone().unwrap_or_default(),
            "event" => self.event.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{EventKind, TriggerContext};

    #[test]
    fn test_matrix_interpolation() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("os".to_string(), "linux".to_string());
        ctx.matrix.insert("arch".to_string(), "x86_64".to_string());

        assert_eq!(
            ctx.interpolate("bin-${{ matrix.os }}-${{ matrix.arch }}"),
            "bin-linux-x86_64"
        );
    }

    #[test]
    fn test_env_interpolation() {
        let mut ctx = InterpolationContext::new();
        ctx.env.insert("PROFILE".to_string(), "release".to_string());

        assert_eq!(
            ctx.interpolate("cargo build --profile ${{ env.PROFILE }}"),
            "cargo build --profile release"
        );
    }

    #[test]
    fn test_trigger_interpolation() {
        let trigger = TriggerContext::new(EventKind::Push, "refs/tags/v2.0.0");
        let ctx = InterpolationContext::new().with_trigger(&trigger);

        assert_eq!(ctx.interpolate("version=${{ ref }}"), "version=v2.0.0");
        assert_eq!(ctx.interpolate("${{ event }}"), "push");
    }

    #[test]
    fn test_missing_keys_resolve_empty() {
        let ctx = InterpolationContext::new();
        assert_eq!(ctx.interpolate("x${{ matrix.missing }}y"), "xy");
    }

    #[test]
    fn test_whitespace_variations() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("os".to_string(), "macos".to_string());

        assert_eq!(ctx.interpolate("${{matrix.os}}"), "macos");
        assert_eq!(ctx.interpolate("${{  matrix.os  }}"), "macos");
    }
}
