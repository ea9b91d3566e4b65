use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{error, info, instrument, warn};

use crate::compositor::{compose, transition_graph_for, CompositeOutcome};
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::failure::CompatibilityMatcher;
use crate::fallback::merge_hard_cuts;
use crate::ffmpeg::{base_args, ensure_output_written, path_arg, EncoderInvocation, EncoderRunner};
use crate::request::RenderRequest;
use crate::response::{EncoderStatus, MergeStrategy, MergedVideo, RenderResponse};
use crate::scene_encoder::{encode_scenes, EncodedClip};
use crate::session::{ActiveSessions, CleanupScheduler, SessionId, Workspace};
use crate::staging::{stage_assets, StagedAssets};
use crate::timeline::RenderPlan;

/// Runs render sessions end to end: validation, staging, per-scene encoding,
/// merging, audio mux and workspace lifecycle.
#[derive(Debug)]
pub struct RenderPipeline<R> {
    config: RenderConfig,
    runner: R,
    http: Client,
    matcher: CompatibilityMatcher,
    scheduler: CleanupScheduler,
    active: ActiveSessions,
}

impl<R: EncoderRunner> RenderPipeline<R> {
    pub fn new(config: RenderConfig, runner: R) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("failed to build HTTP client")?;
        let matcher = CompatibilityMatcher::from_config(&config)?;
        Ok(Self {
            config,
            runner,
            http,
            matcher,
            scheduler: CleanupScheduler::new(),
            active: ActiveSessions::new(),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub fn active_sessions(&self) -> &ActiveSessions {
        &self.active
    }

    pub fn output_root(&self) -> &Path {
        &self.config.output_root
    }

    pub async fn encoder_status(&self) -> EncoderStatus {
        EncoderStatus::from_probe(self.runner.probe().await)
    }

    /// Renders one request. Rejections happen before any file I/O; any later
    /// fatal error removes the partial workspace before it is returned.
    pub async fn render(&self, request: RenderRequest) -> RenderResult<RenderResponse> {
        let plan = request.into_plan(self.config.max_total_seconds)?;
        let version = self
            .runner
            .probe()
            .await
            .map_err(|error| RenderError::EncoderUnavailable {
                reason: format!("{error:#}"),
            })?;

        let session = SessionId::derive(&plan);
        let Some(_claim) = self.active.claim(&session) else {
            warn!(session = %session, "render already in progress for this session");
            return Err(RenderError::SessionBusy {
                session: session.to_string(),
            });
        };
        info!(
            session = %session,
            scenes = plan.scenes.len(),
            total_seconds = plan.total_seconds(),
            transition = %plan.transition.kind,
            transition_seconds = plan.transition.duration,
            full_video = plan.render_full_video,
            encoder = %version,
            "starting render session"
        );

        // A new session under the same name replaces the old, finished workspace.
        self.scheduler.cancel(&session);
        let workspace = match Workspace::create_fresh(&self.config.output_root, &session).await {
            Ok(workspace) => workspace,
            Err(source) => {
                self.scheduler
                    .discard(&session, &self.config.output_root.join(session.as_str()))
                    .await;
                return Err(RenderError::workspace(source));
            }
        };

        match self.run_session(&session, &plan, &workspace).await {
            Ok(response) => {
                self.scheduler.schedule(
                    &session,
                    workspace.root().to_path_buf(),
                    self.config.retention(),
                );
                info!(session = %session, "render session complete");
                Ok(response)
            }
            Err(failure) => {
                error!(
                    session = %session,
                    code = failure.code(),
                    error = %failure,
                    diagnostic = failure.diagnostic().unwrap_or_default(),
                    "render session failed"
                );
                self.scheduler.discard(&session, workspace.root()).await;
                Err(failure)
            }
        }
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn run_session(
        &self,
        session: &SessionId,
        plan: &RenderPlan,
        workspace: &Workspace,
    ) -> RenderResult<RenderResponse> {
        let staged = stage_assets(&self.http, workspace, plan).await?;
        let clips = encode_scenes(&self.runner, &self.config, plan, &staged, workspace).await?;

        let merged = if plan.render_full_video {
            let merged = self.merge(plan, &staged, &clips, workspace).await?;
            self.finalize(&staged, workspace).await?;
            Some(merged)
        } else {
            info!("skipping full video, scene clips only");
            None
        };

        Ok(RenderResponse::assemble(
            session,
            plan,
            &clips,
            staged.audio.is_some(),
            merged.as_ref(),
        ))
    }

    /// Produces `merged_video.mp4` from the scene clips.
    async fn merge(
        &self,
        plan: &RenderPlan,
        staged: &StagedAssets,
        clips: &[EncodedClip],
        workspace: &Workspace,
    ) -> RenderResult<MergedVideo> {
        let output = workspace.merged_path();

        if let [only] = clips {
            tokio::fs::copy(&only.path, &output)
                .await
                .with_context(|| format!("failed to copy {}", only.path.display()))
                .map_err(RenderError::workspace)?;
            info!(strategy = "single_clip", "merged video is the only scene clip");
            return Ok(MergedVideo {
                strategy: MergeStrategy::SingleClip,
                duration: only.duration,
            });
        }

        let captions: Vec<Option<&Path>> = staged.captions.iter().map(|c| c.as_deref()).collect();
        let graph = transition_graph_for(
            clips,
            &captions,
            &plan.transition,
            plan.caption_style,
            &self.config,
        );
        match compose(&self.runner, &self.config, &self.matcher, clips, &graph, &output).await? {
            CompositeOutcome::Crossfaded {
                tier,
                expected_duration,
            } => {
                info!(strategy = "transitions", tier = tier.label(), "merged with transitions");
                Ok(MergedVideo {
                    strategy: MergeStrategy::Transitions,
                    duration: expected_duration,
                })
            }
            CompositeOutcome::Incompatible { .. } => {
                let duration = merge_hard_cuts(
                    &self.runner,
                    &self.config,
                    clips,
                    &workspace.concat_manifest_path(),
                    &output,
                )
                .await?;
                info!(strategy = "hard_cuts", "merged without transitions");
                Ok(MergedVideo {
                    strategy: MergeStrategy::HardCuts,
                    duration,
                })
            }
        }
    }

    /// Muxes staged audio onto the merged video, or promotes the merged video
    /// as-is when there is no audio.
    async fn finalize(&self, staged: &StagedAssets, workspace: &Workspace) -> RenderResult<PathBuf> {
        let merged = workspace.merged_path();
        let output = workspace.final_path();

        let Some(audio) = &staged.audio else {
            tokio::fs::rename(&merged, &output)
                .await
                .with_context(|| format!("failed to move {}", merged.display()))
                .map_err(RenderError::workspace)?;
            info!("no audio staged, final video has no sound");
            return Ok(output);
        };

        let invocation = mux_invocation(&merged, &audio.path, &output, &self.config);
        let outcome = self.runner.run(&invocation).await;
        if !outcome.is_success() {
            return Err(RenderError::AudioMux {
                diagnostic: outcome.diagnostic(),
            });
        }
        ensure_output_written(&output).map_err(|error| RenderError::AudioMux {
            diagnostic: format!("{error:#}"),
        })?;
        info!(path = %output.display(), "audio muxed onto merged video");
        Ok(output)
    }
}

/// Copies the video stream and re-encodes the audio to AAC.
pub fn mux_invocation(
    video: &Path,
    audio: &Path,
    output: &Path,
    config: &RenderConfig,
) -> EncoderInvocation {
    let mut args = base_args();
    args.extend([
        "-i".to_owned(),
        path_arg(video),
        "-i".to_owned(),
        path_arg(audio),
    ]);
    args.extend(
        ["-c:v", "copy", "-c:a", "aac", "-map", "0:v:0", "-map", "1:a:0"]
            .into_iter()
            .map(str::to_owned),
    );
    args.push(path_arg(output));
    EncoderInvocation::new("mux", args, config.mux_timeout())
}
