//! Pre-execution deny-pattern filter.
//!
//! This is a textual scan, not a parser. Alternate spellings, indirect
//! imports (`importlib`, `getattr(__builtins__, ...)`) and encoded strings
//! all get through. It exists to turn away the obvious cases before a
//! process is spawned; it is not a containment mechanism.

use regex::Regex;

use crate::config::DenyPatternConfig;
use crate::error::SandboxError;

/// Built-in rules as `(pattern, construct class)`, checked in order.
const BUILTIN_RULES: &[(&str, &str)] = &[
    (r"import\s+os", "OS/process module import"),
    (r"import\s+sys", "OS/process module import"),
    (r"import\s+subprocess", "OS/process module import"),
    (r"from\s+os\s+import", "OS/process module import"),
    (r"from\s+sys\s+import", "OS/process module import"),
    (r"from\s+subprocess\s+import", "OS/process module import"),
    (r"\bopen\s*\(", "filesystem open call"),
    (r"__import__", "reflective import"),
    (r"\beval\s*\(", "dynamic evaluation"),
    (r"\bexec\s*\(", "dynamic evaluation"),
];

/// Gate decision for one source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Names the construct class of the first rule that matched
    Denied(String),
}

struct DenyRule {
    pattern: Regex,
    reason: String,
}

impl DenyRule {
    fn compile(pattern: &str, reason: &str) -> Result<Self, SandboxError> {
        let compiled = Regex::new(pattern)
            .map_err(|e| SandboxError::Config(format!("invalid deny pattern {pattern:?}: {e}")))?;
        Ok(Self {
            pattern: compiled,
            reason: reason.to_string(),
        })
    }
}

/// Ordered set of deny rules. First match wins.
pub struct StaticGate {
    rules: Vec<DenyRule>,
}

impl StaticGate {
    /// Gate with the built-in rules only.
    #[cfg(test)]
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_extra(&[])
    }

    /// Gate with the built-in rules followed by operator-supplied ones.
    pub fn with_extra(extra: &[DenyPatternConfig]) -> Result<Self, SandboxError> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + extra.len());
        for (pattern, reason) in BUILTIN_RULES {
            rules.push(DenyRule::compile(pattern, reason)?);
        }
        for rule in extra {
            rules.push(DenyRule::compile(&rule.pattern, &rule.reason)?);
        }
        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Scans `code` against the rules. Pure: no I/O, no state.
    pub fn evaluate(&self, code: &str) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(code))
            .map(|rule| Verdict::Denied(rule.reason.clone()))
            .unwrap_or(Verdict::Allowed)
    }
}
