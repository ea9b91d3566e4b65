use std::path::Path;

use tracing::{info, instrument};

use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::ffmpeg::{base_args, ensure_output_written, path_arg, EncoderInvocation, EncoderRunner};
use crate::scene_encoder::EncodedClip;

/// Concat demuxer manifest listing `clips` in order.
pub fn concat_manifest(clips: &[EncodedClip]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", path_arg(&clip.path).replace('\'', r"'\''")))
        .collect()
}

pub fn concat_invocation(manifest: &Path, output: &Path, config: &RenderConfig) -> EncoderInvocation {
    let mut args = base_args();
    args.extend(
        ["-f", "concat", "-safe", "0", "-i"]
            .into_iter()
            .map(str::to_owned),
    );
    args.push(path_arg(manifest));
    args.extend(["-c", "copy"].into_iter().map(str::to_owned));
    args.push(path_arg(output));
    EncoderInvocation::new("concat", args, config.merge_timeout())
}

/// Joins clips with hard cuts by stream copy. The result lasts exactly the
/// sum of the clip durations.
#[instrument(skip_all, fields(clips = clips.len()))]
pub async fn merge_hard_cuts<R: EncoderRunner>(
    runner: &R,
    config: &RenderConfig,
    clips: &[EncodedClip],
    manifest: &Path,
    output: &Path,
) -> RenderResult<f64> {
    let fail = |diagnostic: String| RenderError::FallbackMerge { diagnostic };

    tokio::fs::write(manifest, concat_manifest(clips))
        .await
        .map_err(|error| fail(format!("failed to write {}: {error}", manifest.display())))?;

    let outcome = runner.run(&concat_invocation(manifest, output, config)).await;
    if !outcome.is_success() {
        return Err(fail(outcome.diagnostic()));
    }
    ensure_output_written(output).map_err(|error| fail(format!("{error:#}")))?;

    let duration: f64 = clips.iter().map(|clip| clip.duration).sum();
    info!(duration, "merged clips with hard cuts");
    Ok(duration)
}
