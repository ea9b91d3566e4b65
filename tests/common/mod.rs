#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::Path as UrlPath;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use storyreel::{EncoderInvocation, EncoderRunner, InvocationOutcome, RenderConfig};

pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3, 4];
pub const AUDIO_BYTES: &[u8] = b"ID3\x04\x00fake-voice-over-frames";
pub const CFR_STDERR: &str =
    "[Parsed_xfade_6 @ 0x55] The inputs needs to be a constant frame rate; current rate of 1/0 is invalid";

/// Scripted stand-in for ffmpeg. Successful invocations write a small file
/// at their output path; scripted failures return the configured outcome.
pub struct FakeEncoder {
    failures: Vec<(String, InvocationOutcome)>,
    delay: Duration,
    probe_error: Option<String>,
    events: Mutex<Vec<String>>,
    invocations: Mutex<Vec<EncoderInvocation>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            failures: Vec::new(),
            delay: Duration::ZERO,
            probe_error: None,
            events: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, label: &str, outcome: InvocationOutcome) -> Self {
        self.failures.push((label.to_owned(), outcome));
        self
    }

    pub fn incompatible(self, label: &str) -> Self {
        self.failing(
            label,
            InvocationOutcome::Failed {
                status: Some(1),
                stderr_tail: CFR_STDERR.to_owned(),
            },
        )
    }

    pub fn broken(self, label: &str, stderr: &str) -> Self {
        self.failing(
            label,
            InvocationOutcome::Failed {
                status: Some(1),
                stderr_tail: stderr.to_owned(),
            },
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn unavailable(mut self, reason: &str) -> Self {
        self.probe_error = Some(reason.to_owned());
        self
    }

    /// `start <label>` / `end <label>` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|invocation| invocation.label.clone())
            .collect()
    }

    pub fn invocation(&self, label: &str) -> Option<EncoderInvocation> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .find(|invocation| invocation.label == label)
            .cloned()
    }
}

impl EncoderRunner for FakeEncoder {
    fn run(&self, invocation: &EncoderInvocation) -> impl Future<Output = InvocationOutcome> + Send {
        let invocation = invocation.clone();
        async move {
            self.invocations.lock().unwrap().push(invocation.clone());
            self.events
                .lock()
                .unwrap()
                .push(format!("start {}", invocation.label));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let scripted = self
                .failures
                .iter()
                .find(|(label, _)| *label == invocation.label)
                .map(|(_, outcome)| outcome.clone());
            let outcome = match scripted {
                Some(outcome) => outcome,
                None => {
                    let output = invocation.output_path().unwrap();
                    std::fs::write(output, format!("fake {}", invocation.label)).unwrap();
                    InvocationOutcome::Completed
                }
            };
            self.events
                .lock()
                .unwrap()
                .push(format!("end {}", invocation.label));
            outcome
        }
    }

    fn probe(&self) -> impl Future<Output = anyhow::Result<String>> + Send {
        let probe_error = self.probe_error.clone();
        async move {
            match probe_error {
                Some(reason) => Err(anyhow::anyhow!(reason)),
                None => Ok("ffmpeg version 6.1-fake".to_owned()),
            }
        }
    }
}

/// Serves `/images/<name>` (404 for names starting with `missing`) and
/// `/audio/voice.mp3` from an ephemeral local port.
pub async fn fixture_server() -> SocketAddr {
    async fn image(UrlPath(name): UrlPath<String>) -> Response {
        if name.starts_with("missing") {
            StatusCode::NOT_FOUND.into_response()
        } else {
            PNG_BYTES.to_vec().into_response()
        }
    }

    let app = Router::new()
        .route("/images/:name", get(image))
        .route("/audio/voice.mp3", get(|| async { AUDIO_BYTES.to_vec() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn test_config(output_root: &Path) -> RenderConfig {
    let mut config = RenderConfig::default();
    config.output_root = output_root.to_path_buf();
    config.http_timeout_secs = 10;
    config
}

/// `count` scenes of `seconds` each, back to back, with images on `addr`.
pub fn scenes(addr: SocketAddr, count: usize, seconds: f64) -> Vec<Value> {
    (0..count)
        .map(|index| {
            let start = index as f64 * seconds;
            json!({
                "number": index + 1,
                "imageUrl": format!("http://{addr}/images/scene{}.png", index + 1),
                "startSeconds": start,
                "endSeconds": start + seconds,
                "duration": seconds,
                "text": format!("Scene number {} text", index + 1),
            })
        })
        .collect()
}
