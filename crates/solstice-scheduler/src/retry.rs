//! Transient-error classification.
//!
//! A small table of named categories, each a regex over the error text.
//! Matching any category classifies the failure as transient (retryable);
//! anything else is permanent. Hosts can supply their own table without
//! touching the policy engine.

use regex::Regex;

/// One named class of retryable failure.
#[derive(Debug, Clone)]
pub struct TransientCategory {
    pub name: &'static str,
    matcher: Regex,
}

impl TransientCategory {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            matcher: Regex::new(pattern)?,
        })
    }

    /// Constructor for the built-in table, whose patterns are constants.
    fn builtin(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            matcher: Regex::new(pattern).expect("builtin pattern is valid"),
        }
    }
}

/// Classifies run errors as transient or permanent.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    categories: Vec<TransientCategory>,
}

impl Default for ErrorClassifier {
    /// All default categories enabled: rate limits, network hiccups,
    /// timeouts, and 5xx-class server errors.
    fn default() -> Self {
        Self {
            categories: vec![
                TransientCategory::builtin(
                    "rate-limit",
                    r"(?i)rate[ _-]?limit|too many requests|\b429\b",
                ),
                TransientCategory::builtin(
                    "network",
                    r"(?i)network|connection|\beconn(reset|refused)\b|\benotfound\b|\beai_again\b|socket hang ?up|dns",
                ),
                TransientCategory::builtin("timeout", r"(?i)\btime[d]?[ -]?out\b|\bdeadline\b"),
                TransientCategory::builtin(
                    "server-error",
                    r"(?i)\b5\d{2}\b|internal server error|bad gateway|service unavailable|overloaded",
                ),
            ],
        }
    }
}

impl ErrorClassifier {
    /// Build a classifier from an explicit category table.
    pub fn new(categories: Vec<TransientCategory>) -> Self {
        Self { categories }
    }

    /// Name of the first matching category, or `None` for a permanent error.
    pub fn classify(&self, error: &str) -> Option<&'static str> {
        self.categories
            .iter()
            .find(|c| c.matcher.is_match(error))
            .map(|c| c.name)
    }

    /// Whether the error should be retried.
    pub fn is_transient(&self, error: &str) -> bool {
        self.classify(error).is_some()
    }
}
