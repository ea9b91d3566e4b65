use std::path::PathBuf;

use crate::captions::{drawtext_filter, CaptionStyle};
use crate::config::OutputProfile;
use crate::timeline::Transition;

pub const OUTPUT_LABEL: &str = "outv";

/// One clip entering the transition graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphInput {
    pub duration: f64,
    /// Caption text file to overlay during normalization.
    pub caption_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionOverlay<'a> {
    pub style: CaptionStyle,
    pub font_file: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionGraph {
    pub filter: String,
    /// Start of each crossfade on the accumulated stream, in seconds.
    pub offsets: Vec<f64>,
    pub expected_duration: f64,
}

/// Offset of crossfade `i` is the length of the stream built so far minus
/// the overlap, clamped at zero.
pub fn transition_offsets(durations: &[f64], overlap: f64) -> Vec<f64> {
    let Some((&first, rest)) = durations.split_first() else {
        return Vec::new();
    };
    let mut combined = first;
    rest.iter()
        .map(|&next| {
            let offset = (combined - overlap).max(0.0);
            combined += next - overlap;
            offset
        })
        .collect()
}

/// Length of the crossfaded output: the sum of clip durations minus one
/// overlap per adjacent pair.
pub fn expected_duration(durations: &[f64], overlap: f64) -> f64 {
    let pairs = durations.len().saturating_sub(1) as f64;
    durations.iter().sum::<f64>() - pairs * overlap
}

fn normalize_chain(
    index: usize,
    input: &GraphInput,
    profile: &OutputProfile,
    overlay: Option<&CaptionOverlay<'_>>,
) -> String {
    let (width, height, fps) = (profile.width, profile.height, profile.fps);
    let mut chain = format!(
        "[{index}:v]format=yuv420p,\
         scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,\
         setsar=1,fps={fps},settb=1/{fps},setpts=PTS-STARTPTS"
    );
    if let (Some(overlay), Some(text_file)) = (overlay, input.caption_file.as_deref()) {
        chain.push(',');
        chain.push_str(&drawtext_filter(overlay.style, text_file, overlay.font_file));
    }
    chain.push_str(&format!("[v{index}]"));
    chain
}

/// Builds the chained crossfade graph over `inputs`, ending in `[outv]`.
///
/// Every input is normalized to the output profile first, so clips from
/// different encoder tiers still agree on format, size and timebase.
pub fn build_transition_graph(
    inputs: &[GraphInput],
    transition: &Transition,
    profile: &OutputProfile,
    overlay: Option<&CaptionOverlay<'_>>,
) -> TransitionGraph {
    let durations: Vec<f64> = inputs.iter().map(|input| input.duration).collect();
    let offsets = transition_offsets(&durations, transition.duration);

    let mut segments: Vec<String> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| normalize_chain(index, input, profile, overlay))
        .collect();

    let mut previous = "v0".to_owned();
    for (index, offset) in offsets.iter().enumerate() {
        let output = if index + 2 == inputs.len() {
            OUTPUT_LABEL.to_owned()
        } else {
            format!("x{index}")
        };
        segments.push(format!(
            "[{previous}][v{next}]xfade=transition={kind}:duration={duration:.3}:offset={offset:.3}[{output}]",
            next = index + 1,
            kind = transition.kind,
            duration = transition.duration,
        ));
        previous = output;
    }

    TransitionGraph {
        filter: segments.join(";"),
        offsets,
        expected_duration: expected_duration(&durations, transition.duration),
    }
}
