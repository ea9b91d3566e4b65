use anyhow::Result;
use regex::Regex;

use crate::config::RenderConfig;
use crate::ffmpeg::InvocationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The inputs cannot be crossfaded; hard cuts are still possible.
    Compatibility,
    Fatal,
}

/// Classifies merge failures by matching encoder diagnostics against known
/// compatibility signatures.
#[derive(Debug, Clone)]
pub struct CompatibilityMatcher {
    patterns: Vec<Regex>,
}

impl CompatibilityMatcher {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self::new(config.compatibility_patterns()?))
    }

    pub fn matches(&self, diagnostic: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.is_match(diagnostic))
    }

    /// Timeouts are never compatibility failures: a hung encode says nothing
    /// about whether the inputs can be crossfaded.
    pub fn classify(&self, outcome: &InvocationOutcome) -> FailureClass {
        match outcome {
            InvocationOutcome::Failed { stderr_tail, .. } if self.matches(stderr_tail) => {
                FailureClass::Compatibility
            }
            _ => FailureClass::Fatal,
        }
    }
}
