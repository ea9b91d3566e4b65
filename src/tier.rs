use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ffmpeg::{EncoderInvocation, EncoderRunner, InvocationOutcome};

/// Encoder backends, tried in ladder order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderTier {
    Qsv,
    Vaapi,
    Software,
}

impl EncoderTier {
    pub const LADDER: [EncoderTier; 3] = [Self::Qsv, Self::Vaapi, Self::Software];

    pub fn label(self) -> &'static str {
        match self {
            Self::Qsv => "qsv",
            Self::Vaapi => "vaapi",
            Self::Software => "software",
        }
    }

    /// Hardware tiers cannot burn in text overlays.
    pub fn supports_text_overlay(self) -> bool {
        matches!(self, Self::Software)
    }

    pub fn codec(self) -> &'static str {
        match self {
            Self::Qsv => "h264_qsv",
            Self::Vaapi => "h264_vaapi",
            Self::Software => "libx264",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierAttempt {
    pub tier: EncoderTier,
    pub outcome: InvocationOutcome,
}

#[derive(Debug, Clone)]
pub enum LadderOutcome {
    Succeeded {
        tier: EncoderTier,
        failures: Vec<TierAttempt>,
    },
    Exhausted {
        failures: Vec<TierAttempt>,
    },
}

impl LadderOutcome {
    pub fn failures(&self) -> &[TierAttempt] {
        match self {
            Self::Succeeded { failures, .. } | Self::Exhausted { failures } => failures,
        }
    }

    /// Joined diagnostics of every failed attempt, for logs and error details.
    pub fn diagnostics(&self) -> String {
        self.failures()
            .iter()
            .map(|attempt| format!("[{}] {}", attempt.tier.label(), attempt.outcome.diagnostic()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Walks `tiers` in order, running each eligible tier at most once and
/// stopping at the first success. Tiers without text overlay support are
/// skipped when `needs_text_overlay` is set.
pub async fn climb<R, F>(
    runner: &R,
    tiers: &[EncoderTier],
    needs_text_overlay: bool,
    mut invocation_for: F,
) -> LadderOutcome
where
    R: EncoderRunner,
    F: FnMut(EncoderTier) -> EncoderInvocation,
{
    let mut failures = Vec::new();
    for &tier in tiers {
        if needs_text_overlay && !tier.supports_text_overlay() {
            debug!(tier = tier.label(), "skipping tier without text overlay support");
            continue;
        }

        let invocation = invocation_for(tier);
        let outcome = runner.run(&invocation).await;
        if outcome.is_success() {
            info!(label = %invocation.label, tier = tier.label(), "encode succeeded");
            return LadderOutcome::Succeeded { tier, failures };
        }

        warn!(
            label = %invocation.label,
            tier = tier.label(),
            diagnostic = %outcome.diagnostic(),
            "encode tier failed"
        );
        failures.push(TierAttempt { tier, outcome });
    }
    LadderOutcome::Exhausted { failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        fail: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl EncoderRunner for Scripted {
        fn run(
            &self,
            invocation: &EncoderInvocation,
        ) -> impl Future<Output = InvocationOutcome> + Send {
            self.seen.lock().unwrap().push(invocation.label.clone());
            let failed = self.fail.iter().any(|label| *label == invocation.label);
            async move {
                if failed {
                    InvocationOutcome::Failed {
                        status: Some(1),
                        stderr_tail: "no device".to_owned(),
                    }
                } else {
                    InvocationOutcome::Completed
                }
            }
        }

        fn probe(&self) -> impl Future<Output = anyhow::Result<String>> + Send {
            async { Ok("scripted".to_owned()) }
        }
    }

    fn by_label(tier: EncoderTier) -> EncoderInvocation {
        EncoderInvocation::new(tier.label(), Vec::new(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn first_success_wins() {
        let runner = Scripted {
            fail: vec!["qsv"],
            seen: Mutex::new(Vec::new()),
        };
        let outcome = climb(&runner, &EncoderTier::LADDER, false, by_label).await;
        match outcome {
            LadderOutcome::Succeeded { tier, failures } => {
                assert_eq!(tier, EncoderTier::Vaapi);
                assert_eq!(failures.len(), 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(*runner.seen.lock().unwrap(), vec!["qsv", "vaapi"]);
    }

    #[tokio::test]
    async fn text_overlay_bypasses_hardware_tiers() {
        let runner = Scripted {
            fail: Vec::new(),
            seen: Mutex::new(Vec::new()),
        };
        let outcome = climb(&runner, &EncoderTier::LADDER, true, by_label).await;
        assert!(matches!(
            outcome,
            LadderOutcome::Succeeded {
                tier: EncoderTier::Software,
                ..
            }
        ));
        assert_eq!(*runner.seen.lock().unwrap(), vec!["software"]);
    }

    #[tokio::test]
    async fn every_tier_tried_once_before_exhaustion() {
        let runner = Scripted {
            fail: vec!["qsv", "vaapi", "software"],
            seen: Mutex::new(Vec::new()),
        };
        let outcome = climb(&runner, &EncoderTier::LADDER, false, by_label).await;
        assert!(matches!(outcome, LadderOutcome::Exhausted { .. }));
        assert_eq!(outcome.failures().len(), 3);
        assert!(outcome.diagnostics().contains("[vaapi] exit status 1: no device"));
    }
}
