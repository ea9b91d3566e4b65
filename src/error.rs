use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::tier::EncoderTier;

pub type RenderResult<T> = Result<T, RenderError>;

/// Caller-facing failure of a render session.
///
/// `Display` is short and stable across runs. Encoder stderr is kept in the
/// `diagnostic` fields and only surfaces through [`RenderError::diagnostic`]
/// and the `details` object of the error envelope.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("scenes array is required and cannot be empty")]
    EmptyScenes,
    #[error(
        "maximum video length is 2 hours ({limit} seconds), requested video is {minutes} minutes"
    )]
    DurationExceeded { limit: u32, minutes: u64 },
    #[error("scene {scene} has an invalid or missing image reference")]
    MissingImage { scene: usize },
    #[error("scene {scene} has an unsupported image URL scheme")]
    UnsupportedImageScheme { scene: usize },
    #[error("scene {scene} must end after it starts")]
    InvalidTiming { scene: usize },
    #[error("transition duration must be positive and shorter than every scene")]
    InvalidTransition,
    #[error("a render for session {session} is already in progress")]
    SessionBusy { session: String },
    #[error("encoder is not available: {reason}")]
    EncoderUnavailable { reason: String },
    #[error("failed to prepare session workspace")]
    Workspace {
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to download image for scene {scene}: {}", status_label(*status))]
    ImageDownload {
        scene: usize,
        status: Option<u16>,
        diagnostic: String,
    },
    #[error("all encoder tiers failed for scene {scene}")]
    SceneEncode { scene: usize, diagnostic: String },
    #[error("transition merge failed on the {} tier", tier.label())]
    MergeFailed {
        tier: EncoderTier,
        diagnostic: String,
    },
    #[error("hard-cut merge failed")]
    FallbackMerge { diagnostic: String },
    #[error("failed to add audio to the merged video")]
    AudioMux { diagnostic: String },
}

impl RenderError {
    pub fn workspace(source: impl Into<anyhow::Error>) -> Self {
        Self::Workspace {
            source: source.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyScenes => "empty_scenes",
            Self::DurationExceeded { .. } => "duration_exceeded",
            Self::MissingImage { .. } => "missing_image",
            Self::UnsupportedImageScheme { .. } => "unsupported_image_scheme",
            Self::InvalidTiming { .. } => "invalid_timing",
            Self::InvalidTransition => "invalid_transition",
            Self::SessionBusy { .. } => "session_busy",
            Self::EncoderUnavailable { .. } => "encoder_unavailable",
            Self::Workspace { .. } => "workspace",
            Self::ImageDownload { .. } => "image_download",
            Self::SceneEncode { .. } => "scene_encode",
            Self::MergeFailed { .. } => "merge_failed",
            Self::FallbackMerge { .. } => "fallback_merge",
            Self::AudioMux { .. } => "audio_mux",
        }
    }

    /// Input validation failures, raised before any workspace or subprocess exists.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::EmptyScenes
                | Self::DurationExceeded { .. }
                | Self::MissingImage { .. }
                | Self::UnsupportedImageScheme { .. }
                | Self::InvalidTiming { .. }
                | Self::InvalidTransition
        )
    }

    /// The failing scene index (1-based), when the error is tied to one scene.
    pub fn scene(&self) -> Option<usize> {
        match self {
            Self::MissingImage { scene }
            | Self::UnsupportedImageScheme { scene }
            | Self::InvalidTiming { scene }
            | Self::ImageDownload { scene, .. }
            | Self::SceneEncode { scene, .. } => Some(*scene),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::ImageDownload { diagnostic, .. }
            | Self::SceneEncode { diagnostic, .. }
            | Self::MergeFailed { diagnostic, .. }
            | Self::FallbackMerge { diagnostic }
            | Self::AudioMux { diagnostic } => Some(diagnostic.as_str()),
            _ => None,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let mut details = serde_json::Map::new();
        if let Some(scene) = self.scene() {
            details.insert("scene".to_owned(), json!(scene));
        }
        if let Self::ImageDownload {
            status: Some(status),
            ..
        } = self
        {
            details.insert("httpStatus".to_owned(), json!(status));
        }
        if let Some(diagnostic) = self.diagnostic().filter(|text| !text.trim().is_empty()) {
            details.insert("diagnostic".to_owned(), json!(diagnostic));
        }
        if let Self::Workspace { source } = self {
            details.insert("cause".to_owned(), json!(format!("{source:#}")));
        }

        ErrorEnvelope {
            success: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.to_string(),
                details: (!details.is_empty()).then_some(Value::Object(details)),
            },
        }
    }
}

fn status_label(status: Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "request failed".to_owned(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
