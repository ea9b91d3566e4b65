use std::path::Path;

use tracing::{info, instrument, warn};

use crate::captions::CaptionStyle;
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::failure::{CompatibilityMatcher, FailureClass};
use crate::ffmpeg::{base_args, ensure_output_written, path_arg, EncoderInvocation, EncoderRunner};
use crate::filter_graph::{
    build_transition_graph, CaptionOverlay, GraphInput, TransitionGraph, OUTPUT_LABEL,
};
use crate::scene_encoder::EncodedClip;
use crate::tier::{climb, EncoderTier, LadderOutcome, TierAttempt};
use crate::timeline::Transition;

const HW_OUTPUT_LABEL: &str = "outhw";

#[derive(Debug, Clone)]
pub enum CompositeOutcome {
    Crossfaded {
        tier: EncoderTier,
        expected_duration: f64,
    },
    /// Every tier rejected the graph as incompatible with crossfading.
    Incompatible { failures: Vec<TierAttempt> },
}

/// Builds the crossfade graph for `clips`, overlaying captions only on
/// clips that did not burn one in already.
pub fn transition_graph_for(
    clips: &[EncodedClip],
    captions: &[Option<&Path>],
    transition: &Transition,
    caption_style: Option<CaptionStyle>,
    config: &RenderConfig,
) -> TransitionGraph {
    let inputs: Vec<GraphInput> = clips
        .iter()
        .enumerate()
        .map(|(position, clip)| GraphInput {
            duration: clip.duration,
            caption_file: captions
                .get(position)
                .copied()
                .flatten()
                .filter(|_| !clip.caption_burned)
                .map(Path::to_path_buf),
        })
        .collect();
    let overlay = caption_style.map(|style| CaptionOverlay {
        style,
        font_file: &config.caption_font,
    });
    build_transition_graph(&inputs, transition, &config.profile, overlay.as_ref())
}

/// Encoder arguments for the whole-graph merge on one tier.
pub fn merge_invocation(
    tier: EncoderTier,
    clips: &[EncodedClip],
    graph: &TransitionGraph,
    config: &RenderConfig,
    output: &Path,
) -> EncoderInvocation {
    let mut args = base_args();
    if tier == EncoderTier::Vaapi {
        args.push("-vaapi_device".to_owned());
        args.push(config.vaapi_device.clone());
    }
    for clip in clips {
        args.push("-i".to_owned());
        args.push(path_arg(&clip.path));
    }

    let (filter, label) = match tier {
        EncoderTier::Vaapi => (
            format!(
                "{};[{OUTPUT_LABEL}]format=nv12,hwupload[{HW_OUTPUT_LABEL}]",
                graph.filter
            ),
            HW_OUTPUT_LABEL,
        ),
        EncoderTier::Qsv | EncoderTier::Software => (graph.filter.clone(), OUTPUT_LABEL),
    };
    args.push("-filter_complex".to_owned());
    args.push(filter);
    args.push("-map".to_owned());
    args.push(format!("[{label}]"));

    let quality = config.profile.hardware_quality.to_string();
    let tail: Vec<String> = match tier {
        EncoderTier::Qsv => vec![
            "-c:v".into(),
            tier.codec().into(),
            "-preset".into(),
            "veryfast".into(),
            "-global_quality".into(),
            quality,
        ],
        EncoderTier::Vaapi => vec!["-c:v".into(), tier.codec().into(), "-qp".into(), quality],
        EncoderTier::Software => vec![
            "-c:v".into(),
            tier.codec().into(),
            "-preset".into(),
            "ultrafast".into(),
            "-crf".into(),
            config.profile.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ],
    };
    args.extend(tail);
    args.push(path_arg(output));

    EncoderInvocation::new(
        format!("merge:{}", tier.label()),
        args,
        config.merge_timeout(),
    )
}

/// Runs the crossfade merge through the tier ladder.
///
/// Any failure that does not match a compatibility signature aborts the
/// session, even when other tiers failed with compatibility errors.
#[instrument(skip_all, fields(clips = clips.len()))]
pub async fn compose<R: EncoderRunner>(
    runner: &R,
    config: &RenderConfig,
    matcher: &CompatibilityMatcher,
    clips: &[EncodedClip],
    graph: &TransitionGraph,
    output: &Path,
) -> RenderResult<CompositeOutcome> {
    info!(
        transitions = graph.offsets.len(),
        expected_duration = graph.expected_duration,
        "merging clips with transitions"
    );
    let outcome = climb(runner, &config.tiers, false, |tier| {
        merge_invocation(tier, clips, graph, config, output)
    })
    .await;

    let failures = match outcome {
        LadderOutcome::Succeeded { tier, .. } => {
            ensure_output_written(output).map_err(|error| RenderError::MergeFailed {
                tier,
                diagnostic: format!("{error:#}"),
            })?;
            return Ok(CompositeOutcome::Crossfaded {
                tier,
                expected_duration: graph.expected_duration,
            });
        }
        LadderOutcome::Exhausted { failures } => failures,
    };

    if let Some(fatal) = failures
        .iter()
        .find(|attempt| matcher.classify(&attempt.outcome) == FailureClass::Fatal)
    {
        return Err(RenderError::MergeFailed {
            tier: fatal.tier,
            diagnostic: fatal.outcome.diagnostic(),
        });
    }

    warn!(
        tiers = failures.len(),
        "every merge tier reported a compatibility failure, falling back to hard cuts"
    );
    Ok(CompositeOutcome::Incompatible { failures })
}
