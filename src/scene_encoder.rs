use std::ops::Range;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, info, instrument};

use crate::captions::{drawtext_filter, CaptionStyle};
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::ffmpeg::{base_args, ensure_output_written, path_arg, EncoderInvocation, EncoderRunner};
use crate::session::Workspace;
use crate::staging::StagedAssets;
use crate::tier::{climb, EncoderTier, LadderOutcome};
use crate::timeline::{RenderPlan, Scene};

/// A normalized per-scene clip, ready for the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedClip {
    pub index: usize,
    pub path: PathBuf,
    pub duration: f64,
    pub tier: EncoderTier,
    pub caption_burned: bool,
}

/// Inputs for encoding one scene.
#[derive(Debug, Clone)]
pub struct SceneJob<'a> {
    pub scene: &'a Scene,
    pub image: &'a Path,
    /// Caption text file and style, when this scene carries a caption.
    pub caption: Option<(&'a Path, CaptionStyle)>,
    pub output: PathBuf,
}

/// Splits `count` scenes into consecutive batches of at most `batch_size`.
pub fn batch_plan(count: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..count)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(count))
        .collect()
}

pub fn scene_label(scene: &Scene, tier: EncoderTier) -> String {
    format!("{}:{}", scene.stem(), tier.label())
}

/// Encoder arguments for one scene on one tier.
pub fn scene_invocation(
    tier: EncoderTier,
    job: &SceneJob<'_>,
    config: &RenderConfig,
) -> EncoderInvocation {
    let profile = &config.profile;
    let (width, height, fps) = (profile.width, profile.height, profile.fps);
    let duration = format!("{:.3}", job.scene.duration());
    let image = path_arg(job.image);

    let mut args = base_args();
    match tier {
        EncoderTier::Qsv => {
            args.extend(strings(&["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]));
            args.extend(strings(&["-loop", "1", "-i", &image, "-t", &duration]));
            args.push("-vf".to_owned());
            args.push(format!(
                "hwupload=extra_hw_frames=64,format=qsv,scale_qsv={width}:{height}"
            ));
            args.extend(strings(&["-c:v", tier.codec(), "-preset", "veryfast"]));
            args.push("-global_quality".to_owned());
            args.push(profile.hardware_quality.to_string());
            args.extend(strings(&["-look_ahead", "0"]));
        }
        EncoderTier::Vaapi => {
            args.extend(strings(&["-vaapi_device", &config.vaapi_device]));
            args.extend(strings(&["-loop", "1", "-i", &image, "-t", &duration]));
            args.push("-vf".to_owned());
            args.push(format!(
                "format=nv12,hwupload,\
                 scale_vaapi={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad_vaapi={width}:{height}:(ow-iw)/2:(oh-ih)/2"
            ));
            args.extend(strings(&["-c:v", tier.codec(), "-qp"]));
            args.push(profile.hardware_quality.to_string());
        }
        EncoderTier::Software => {
            let mut filter = format!(
                "scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
            );
            if let Some((text_file, style)) = job.caption {
                filter.push(',');
                filter.push_str(&drawtext_filter(style, text_file, &config.caption_font));
            }
            args.extend(strings(&["-loop", "1", "-i", &image, "-t", &duration]));
            args.extend(strings(&["-c:v", tier.codec(), "-preset", "ultrafast", "-crf"]));
            args.push(profile.crf.to_string());
            args.extend(strings(&["-tune", "stillimage", "-vf", &filter]));
            args.extend(strings(&["-pix_fmt", "yuv420p"]));
        }
    }
    // Constant frame rate, GOP of one second and no B-frames keep clips
    // valid crossfade inputs.
    let fps = fps.to_string();
    args.extend(strings(&["-r", &fps, "-g", &fps, "-bf", "0"]));
    args.push(path_arg(&job.output));

    EncoderInvocation::new(
        scene_label(job.scene, tier),
        args,
        config.scene_timeout.for_duration(job.scene.duration()),
    )
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

/// Runs one scene through the tier ladder.
pub async fn encode_scene<R: EncoderRunner>(
    runner: &R,
    config: &RenderConfig,
    job: SceneJob<'_>,
) -> RenderResult<EncodedClip> {
    let needs_overlay = job.caption.is_some();
    let outcome = climb(runner, &config.tiers, needs_overlay, |tier| {
        scene_invocation(tier, &job, config)
    })
    .await;

    let scene = job.scene.index;
    match outcome {
        LadderOutcome::Succeeded { tier, .. } => {
            ensure_output_written(&job.output).map_err(|error| RenderError::SceneEncode {
                scene,
                diagnostic: format!("{error:#}"),
            })?;
            Ok(EncodedClip {
                index: scene,
                path: job.output,
                duration: job.scene.duration(),
                tier,
                caption_burned: needs_overlay && tier.supports_text_overlay(),
            })
        }
        LadderOutcome::Exhausted { .. } => Err(RenderError::SceneEncode {
            scene,
            diagnostic: if outcome.failures().is_empty() {
                "no configured tier can encode this scene".to_owned()
            } else {
                outcome.diagnostics()
            },
        }),
    }
}

/// Encodes every scene in fixed-size batches. Members of a batch run
/// concurrently; the next batch starts only after the whole batch finishes.
#[instrument(skip_all, fields(scenes = plan.scenes.len(), batch_size = config.batch_size))]
pub async fn encode_scenes<R: EncoderRunner>(
    runner: &R,
    config: &RenderConfig,
    plan: &RenderPlan,
    staged: &StagedAssets,
    workspace: &Workspace,
) -> RenderResult<Vec<EncodedClip>> {
    let batches = batch_plan(plan.scenes.len(), config.batch_size);
    let mut clips = Vec::with_capacity(plan.scenes.len());

    for (number, batch) in batches.iter().enumerate() {
        info!(
            batch = number + 1,
            of = batches.len(),
            first_scene = batch.start + 1,
            last_scene = batch.end,
            "encoding batch"
        );
        let jobs = batch.clone().map(|position| {
            let scene = &plan.scenes[position];
            let caption = staged.captions[position]
                .as_deref()
                .zip(plan.caption_style);
            encode_scene(
                runner,
                config,
                SceneJob {
                    scene,
                    image: &staged.images[position],
                    caption,
                    output: workspace.clip_path(scene.index),
                },
            )
        });

        for result in join_all(jobs).await {
            clips.push(result?);
        }
        info!(batch = number + 1, "batch complete");
        debug!("batch boundary, encoder processes released");
    }
    Ok(clips)
}
