use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

const STDERR_TAIL_CHARS: usize = 4000;

/// One encoder process to run: its arguments and how long it may take.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInvocation {
    pub label: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl EncoderInvocation {
    pub fn new(label: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            args,
            timeout,
        }
    }

    /// The last argument, which is always the output file.
    pub fn output_path(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|arg| arg == value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Completed,
    Failed {
        status: Option<i32>,
        stderr_tail: String,
    },
    TimedOut {
        after: Duration,
    },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn diagnostic(&self) -> String {
        match self {
            Self::Completed => String::new(),
            Self::Failed {
                status,
                stderr_tail,
            } => match status {
                Some(code) => format!("exit status {code}: {stderr_tail}"),
                None => stderr_tail.clone(),
            },
            Self::TimedOut { after } => {
                format!("encoder timed out after {} seconds", after.as_secs())
            }
        }
    }
}

/// Seam between the render pipeline and the external encoder process.
pub trait EncoderRunner: Send + Sync {
    /// Runs one invocation to completion or timeout. Spawn failures are
    /// reported as `Failed` so the tier ladder can move on.
    fn run(&self, invocation: &EncoderInvocation)
        -> impl Future<Output = InvocationOutcome> + Send;

    /// Returns the encoder's version banner, or an error when it cannot run.
    fn probe(&self) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

/// Drives the real `ffmpeg` binary through `tokio::process`.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn resolve(mode: FfmpegMode, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        match mode {
            FfmpegMode::Auto | FfmpegMode::System => Ok(Self::new("ffmpeg")),
            FfmpegMode::Sidecar => {
                #[cfg(feature = "sidecar_ffmpeg")]
                {
                    let path = ffmpeg_sidecar::paths::ffmpeg_path();
                    if !path.exists() {
                        ffmpeg_sidecar::download::auto_download()
                            .context("failed to auto-download ffmpeg sidecar binary")?;
                    }
                    Ok(Self::new(path))
                }
                #[cfg(not(feature = "sidecar_ffmpeg"))]
                {
                    Err(anyhow!(
                        "ffmpeg sidecar mode requested but storyreel was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                    ))
                }
            }
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl EncoderRunner for FfmpegRunner {
    fn run(
        &self,
        invocation: &EncoderInvocation,
    ) -> impl Future<Output = InvocationOutcome> + Send {
        let binary = self.binary.clone();
        let invocation = invocation.clone();
        async move {
            debug!(
                label = %invocation.label,
                args = %invocation.args.join(" "),
                "spawning encoder"
            );
            let child = Command::new(&binary)
                .args(&invocation.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            let child = match child {
                Ok(child) => child,
                Err(error) => {
                    return InvocationOutcome::Failed {
                        status: None,
                        stderr_tail: spawn_error_message(&binary, &error),
                    }
                }
            };

            // Dropping the wait future on timeout drops the child, which kills it.
            match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
                Err(_) => InvocationOutcome::TimedOut {
                    after: invocation.timeout,
                },
                Ok(Err(error)) => InvocationOutcome::Failed {
                    status: None,
                    stderr_tail: format!("failed waiting for encoder process: {error}"),
                },
                Ok(Ok(output)) if output.status.success() => InvocationOutcome::Completed,
                Ok(Ok(output)) => InvocationOutcome::Failed {
                    status: output.status.code(),
                    stderr_tail: last_n_chars(
                        &String::from_utf8_lossy(&output.stderr),
                        STDERR_TAIL_CHARS,
                    ),
                },
            }
        }
    }

    fn probe(&self) -> impl Future<Output = Result<String>> + Send {
        let binary = self.binary.clone();
        async move {
            let output = Command::new(&binary)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|error| anyhow!(spawn_error_message(&binary, &error)))?;
            if !output.status.success() {
                bail!(
                    "{} -version exited with status {}",
                    binary.display(),
                    output.status
                );
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let banner = stdout.lines().next().unwrap_or_default().trim().to_owned();
            if banner.is_empty() {
                bail!("{} -version printed nothing", binary.display());
            }
            Ok(banner)
        }
    }
}

fn spawn_error_message(binary: &Path, error: &std::io::Error) -> String {
    if error.kind() == ErrorKind::NotFound {
        format!(
            "ffmpeg executable not found (resolved_path={}). Install ffmpeg or use sidecar mode with `--features sidecar_ffmpeg`.",
            binary.display()
        )
    } else {
        format!(
            "failed to spawn ffmpeg process (resolved_path={}): {error}",
            binary.display()
        )
    }
}

/// Common leading arguments for every encoder invocation.
pub fn base_args() -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
    ]
}

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Quotes a value for use inside a filter graph option.
pub fn quote_filter_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn ensure_output_written(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("encoder output missing: {}", path.display()))?;
    if metadata.len() == 0 {
        bail!("encoder output is empty: {}", path.display());
    }
    Ok(())
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}
