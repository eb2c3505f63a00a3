//! Ignore rules for activity files

use regex::Regex;
use tracing::{info, warn};

/// A single compiled ignore rule
#[derive(Debug, Clone)]
enum IgnoreRule {
    Pattern { source: String, regex: Regex },
    /// Pattern that failed to compile; matched as a plain substring
    Literal(String),
}

impl IgnoreRule {
    fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => IgnoreRule::Pattern {
                source: pattern.to_string(),
                regex,
            },
            Err(e) => {
                warn!("Ignore pattern '{}' is not a valid regex ({}), using substring match", pattern, e);
                IgnoreRule::Literal(pattern.to_string())
            }
        }
    }

    fn source(&self) -> &str {
        match self {
            IgnoreRule::Pattern { source, .. } => source,
            IgnoreRule::Literal(source) => source,
        }
    }

    fn matches(&self, file: &str) -> bool {
        match self {
            IgnoreRule::Pattern { regex, .. } => regex.is_match(file),
            IgnoreRule::Literal(needle) => file.contains(needle.as_str()),
        }
    }
}

/// Ordered set of ignore rules
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRuleSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: patterns
                .into_iter()
                .map(|p| IgnoreRule::compile(p.as_ref()))
                .collect(),
        }
    }

    /// Source patterns in their configured order
    pub fn patterns(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.source().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the first pattern matching `file`, if any
    pub fn matching_pattern(&self, file: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(file))
            .map(IgnoreRule::source)
    }

    pub fn is_ignored(&self, file: Option<&str>) -> bool {
        let Some(file) = file else {
            return false;
        };
        match self.matching_pattern(file) {
            Some(pattern) => {
                info!("Ignoring activity matching pattern '{}': {}", pattern, file);
                true
            }
            None => false,
        }
    }
}
