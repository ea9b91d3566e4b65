use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::error::RenderError;
use crate::ffmpeg::EncoderRunner;
use crate::pipeline::RenderPipeline;
use crate::request::RenderRequest;

pub struct AppState<R> {
    pipeline: Arc<RenderPipeline<R>>,
    artifacts: ArtifactStore,
}

pub fn router<R: EncoderRunner + 'static>(pipeline: Arc<RenderPipeline<R>>) -> Router {
    let state = Arc::new(AppState {
        artifacts: ArtifactStore::new(pipeline.output_root()),
        pipeline,
    });
    Router::new()
        .route("/api/render-videos", post(render_videos::<R>))
        .route(
            "/api/download-video/:session/:filename",
            get(download_video::<R>),
        )
        .route(
            "/api/download-all-videos/:session",
            get(download_all_videos::<R>),
        )
        .route("/api/ffmpeg-status", get(ffmpeg_status::<R>))
        .with_state(state)
}

/// Binds `addr` and serves until the process is stopped.
pub async fn serve<R: EncoderRunner + 'static>(
    pipeline: Arc<RenderPipeline<R>>,
    addr: SocketAddr,
) -> Result<()> {
    tokio::fs::create_dir_all(pipeline.output_root())
        .await
        .with_context(|| {
            format!(
                "failed to create output root {}",
                pipeline.output_root().display()
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "render server listening");
    axum::serve(listener, router(pipeline))
        .await
        .context("render server stopped")
}

async fn render_videos<R: EncoderRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed render request");
            let body = json!({
                "success": false,
                "error": {
                    "code": "invalid_request",
                    "message": rejection.body_text(),
                }
            });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    match state.pipeline.render(request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => render_error_response(&error),
    }
}

fn render_error_response(error: &RenderError) -> Response {
    let status = if error.is_rejection() {
        StatusCode::BAD_REQUEST
    } else if matches!(error, RenderError::SessionBusy { .. }) {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(error.envelope())).into_response()
}

async fn download_video<R: EncoderRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    UrlPath((session, filename)): UrlPath<(String, String)>,
) -> Response {
    match state.artifacts.resolve(&session, &filename) {
        Ok(artifact) => send_artifact(artifact).await,
        Err(error) => artifact_error_response(error),
    }
}

async fn download_all_videos<R: EncoderRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
    UrlPath(session): UrlPath<String>,
) -> Response {
    match state.artifacts.bundle(&session).await {
        Ok(artifact) => send_artifact(artifact).await,
        Err(error) => artifact_error_response(error),
    }
}

async fn ffmpeg_status<R: EncoderRunner + 'static>(
    State(state): State<Arc<AppState<R>>>,
) -> Response {
    Json(state.pipeline.encoder_status().await).into_response()
}

async fn send_artifact(artifact: Artifact) -> Response {
    let opened = async {
        let file = tokio::fs::File::open(&artifact.path).await?;
        let len = file.metadata().await?.len();
        Ok::<_, std::io::Error>((file, len))
    };
    let (file, len) = match opened.await {
        Ok(opened) => opened,
        Err(error) => return artifact_error_response(ArtifactError::Io(error.into())),
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.download_name.replace('"', "")
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&artifact.path))
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(ReaderStream::new(file)))
        .unwrap_or_else(|error| {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        })
}

fn artifact_error_response(error: ArtifactError) -> Response {
    let status = match &error {
        ArtifactError::InvalidName => StatusCode::BAD_REQUEST,
        ArtifactError::NotFound => StatusCode::NOT_FOUND,
        ArtifactError::Traversal(path) => {
            warn!(path = %path.display(), "blocked artifact path outside its session");
            StatusCode::FORBIDDEN
        }
        ArtifactError::Io(source) => {
            warn!(error = %format!("{source:#}"), "failed to serve artifact");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("txt") => "text/plain; charset=utf-8",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type(Path::new("a/final_video.mp4")), "video/mp4");
        assert_eq!(content_type(Path::new("script.txt")), "text/plain; charset=utf-8");
        assert_eq!(content_type(Path::new("bundle.zip")), "application/zip");
        assert_eq!(content_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn rejections_map_to_bad_request() {
        let response = render_error_response(&RenderError::EmptyScenes);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = render_error_response(&RenderError::AudioMux {
            diagnostic: "broken".to_owned(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = render_error_response(&RenderError::SessionBusy {
            session: "Same_Title".to_owned(),
        });
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn artifact_errors_map_to_statuses() {
        assert_eq!(
            artifact_error_response(ArtifactError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            artifact_error_response(ArtifactError::InvalidName).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
