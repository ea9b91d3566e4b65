use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::error::{RenderError, RenderResult};
use crate::session::Workspace;
use crate::timeline::{RenderPlan, Scene};

#[derive(Debug, Clone)]
pub struct StagedAssets {
    /// Local image per scene, in scene order.
    pub images: Vec<PathBuf>,
    /// Caption text file per scene, when that scene has a caption.
    pub captions: Vec<Option<PathBuf>>,
    pub audio: Option<StagedAudio>,
    pub script: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedAudio {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Materializes every scene image, the optional audio track, the transcript
/// and caption text files inside `workspace`.
///
/// Image failures abort the session. Audio failures are logged and the
/// render continues without a soundtrack.
#[instrument(skip_all, fields(workspace = %workspace.root().display()))]
pub async fn stage_assets(
    http: &Client,
    workspace: &Workspace,
    plan: &RenderPlan,
) -> RenderResult<StagedAssets> {
    let mut images = Vec::with_capacity(plan.scenes.len());
    for scene in &plan.scenes {
        images.push(stage_image(http, workspace, scene).await?);
    }

    let mut captions = Vec::with_capacity(plan.scenes.len());
    for scene in &plan.scenes {
        let path = match &scene.caption {
            Some(text) => {
                let path = workspace.caption_path(scene.index);
                tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("failed to write caption {}", path.display()))
                    .map_err(RenderError::workspace)?;
                Some(path)
            }
            None => None,
        };
        captions.push(path);
    }

    let audio = match plan.audio.as_deref() {
        Some(reference) => match stage_audio(http, reference, &workspace.audio_path()).await {
            Ok(audio) => {
                info!(bytes = audio.bytes, sha256 = %audio.sha256, "staged audio");
                Some(audio)
            }
            Err(error) => {
                warn!(error = %format!("{error:#}"), "audio unavailable, rendering without sound");
                None
            }
        },
        None => {
            info!("no audio provided, rendering without sound");
            None
        }
    };

    let script = workspace.script_path();
    tokio::fs::write(&script, plan.transcript())
        .await
        .with_context(|| format!("failed to write transcript {}", script.display()))
        .map_err(RenderError::workspace)?;

    Ok(StagedAssets {
        images,
        captions,
        audio,
        script,
    })
}

async fn stage_image(http: &Client, workspace: &Workspace, scene: &Scene) -> RenderResult<PathBuf> {
    info!(scene = scene.index, url = %truncated(scene.image_url.as_str(), 60), "downloading image");
    let fail = |status: Option<u16>, diagnostic: String| RenderError::ImageDownload {
        scene: scene.index,
        status,
        diagnostic,
    };

    let response = http
        .get(scene.image_url.clone())
        .send()
        .await
        .map_err(|error| fail(None, error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fail(
            Some(status.as_u16()),
            status.canonical_reason().unwrap_or_default().to_owned(),
        ));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|error| fail(Some(status.as_u16()), error.to_string()))?;

    let path = workspace.image_path(scene.index, image_extension(&bytes));
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("failed to write image {}", path.display()))
        .map_err(RenderError::workspace)?;
    Ok(path)
}

/// Extension matching the downloaded bytes, defaulting to `jpg`.
fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

/// Decodes an embedded data URI or downloads an http(s) URL into `destination`.
pub async fn stage_audio(http: &Client, reference: &str, destination: &Path) -> Result<StagedAudio> {
    let bytes = if reference.starts_with("data:") {
        decode_data_uri(reference)?
    } else if reference.starts_with("http://") || reference.starts_with("https://") {
        info!(url = %truncated(reference, 80), "downloading audio");
        let response = http
            .get(reference)
            .send()
            .await
            .with_context(|| format!("failed to download audio {}", truncated(reference, 80)))?;
        let status = response.status();
        if !status.is_success() {
            bail!("audio download returned HTTP {}", status.as_u16());
        }
        response
            .bytes()
            .await
            .context("failed to read audio response body")?
            .to_vec()
    } else {
        bail!("unsupported audio reference (expected a data URI or http(s) URL)");
    };

    if bytes.is_empty() {
        bail!("audio reference resolved to an empty file");
    }
    tokio::fs::write(destination, &bytes)
        .await
        .with_context(|| format!("failed to write audio {}", destination.display()))?;

    Ok(StagedAudio {
        path: destination.to_path_buf(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
    })
}

fn decode_data_uri(reference: &str) -> Result<Vec<u8>> {
    let (_, payload) = reference
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI has no payload"))?;
    STANDARD
        .decode(payload.trim())
        .context("data URI payload is not valid base64")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn truncated(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
