use serde::Serialize;

use crate::scene_encoder::EncodedClip;
use crate::session::{SessionId, AUDIO_FILE, FINAL_VIDEO_FILE, SCRIPT_FILE};
use crate::timeline::{RenderPlan, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    SingleClip,
    Transitions,
    HardCuts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedVideo {
    pub strategy: MergeStrategy,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneVideo {
    pub scene: String,
    pub url: String,
    pub duration: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub success: bool,
    pub session_id: String,
    pub message: String,
    pub scene_videos: Vec<SceneVideo>,
    pub script: String,
    pub audio: Option<String>,
    pub download_all: String,
    pub render_full_video: bool,
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    /// Expected length of the merged video in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_duration: Option<f64>,
}

pub fn download_url(session: &SessionId, filename: &str) -> String {
    format!("/api/download-video/{session}/{filename}")
}

pub fn bundle_url(session: &SessionId) -> String {
    format!("/api/download-all-videos/{session}")
}

impl RenderResponse {
    pub fn assemble(
        session: &SessionId,
        plan: &RenderPlan,
        clips: &[EncodedClip],
        audio_staged: bool,
        merged: Option<&MergedVideo>,
    ) -> Self {
        let scene_videos = plan
            .scenes
            .iter()
            .zip(clips)
            .map(|(scene, clip)| SceneVideo {
                scene: format!("{:03}", scene.index),
                url: download_url(session, &format!("{}.mp4", scene.stem())),
                duration: format!("{:.2}", clip.duration),
                start_time: scene.start_label.clone(),
                end_time: scene.end_label.clone(),
            })
            .collect();

        let message = match merged.map(|merged| merged.strategy) {
            None => "Individual scene videos rendered (1080p HD)".to_owned(),
            Some(MergeStrategy::HardCuts) => {
                "Video rendered with hard cuts; transitions were not possible for these clips (1080p HD)"
                    .to_owned()
            }
            Some(_) => format!(
                "Video rendered with {} transitions (1080p HD)",
                plan.transition.kind
            ),
        };

        Self {
            success: true,
            session_id: session.to_string(),
            message,
            scene_videos,
            script: download_url(session, SCRIPT_FILE),
            audio: audio_staged.then(|| download_url(session, AUDIO_FILE)),
            download_all: bundle_url(session),
            render_full_video: plan.render_full_video,
            transition: plan.transition.clone(),
            final_video: merged.map(|_| download_url(session, FINAL_VIDEO_FILE)),
            merge_strategy: merged.map(|merged| merged.strategy),
            merged_duration: merged.map(|merged| merged.duration),
        }
    }
}

/// Result of probing the encoder binary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncoderStatus {
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub message: String,
}

impl EncoderStatus {
    pub fn from_probe(probe: anyhow::Result<String>) -> Self {
        match probe {
            Ok(version) => Self {
                installed: true,
                version: Some(version),
                message: "FFmpeg is installed and ready".to_owned(),
            },
            Err(error) => Self {
                installed: false,
                version: None,
                message: format!("{error:#}"),
            },
        }
    }
}
