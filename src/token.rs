//! Instance token generation.
//!
//! Every fetch-for-compilation call mints a fresh token of the shape
//! `{package}_{millis}_{suffix}`. The token namespaces every rewritten
//! identifier for that compilation pass, so two concurrently open fetches of
//! the same package (even across browser tabs) can never collide on style
//! class names or schema export names. Tokens are never stored server-side.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Length of the random suffix, in hex characters.
const SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceToken(String);

impl InstanceToken {
    /// Mint a token with a random suffix.
    pub fn generate(package: &str) -> Self {
        Self::build(package, &random_suffix())
    }

    /// Mint a token using a caller-supplied disambiguation value in place of
    /// the random suffix. An empty-after-sanitize hint falls back to random.
    pub fn with_hint(package: &str, hint: &str) -> Self {
        let cleaned: String = hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if cleaned.is_empty() {
            Self::generate(package)
        } else {
            Self::build(package, &cleaned)
        }
    }

    fn build(package: &str, suffix: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let base = identifier_safe(package);
        InstanceToken(format!("{}_{}_{}", base, millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_suffix() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..SUFFIX_LEN].to_string()
}

/// Tokens are used as identifier prefixes in rewritten source, so the
/// package part must be a valid identifier head.
fn identifier_safe(package: &str) -> String {
    let mut out = String::with_capacity(package.len());
    for c in package.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        }
    }
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 'w');
    }
    out
}
