use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::session::{SessionId, AUDIO_FILE, FINAL_VIDEO_FILE, SCRIPT_FILE};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid session or file name")]
    InvalidName,
    #[error("file not found")]
    NotFound,
    #[error("path traversal blocked: {0}")]
    Traversal(PathBuf),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// A file ready to be served, with the name offered to the downloader.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub download_name: String,
}

/// Read access to rendered sessions under the output root. Every resolved
/// path is canonicalized and must stay inside its session directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session: &str) -> Result<(SessionId, PathBuf), ArtifactError> {
        let session = SessionId::parse(session).ok_or(ArtifactError::InvalidName)?;
        let root = canonical(&self.root)?;
        let dir = canonical(&root.join(session.as_str()))?;
        if !dir.starts_with(&root) || !dir.is_dir() {
            return Err(ArtifactError::Traversal(dir));
        }
        Ok((session, dir))
    }

    /// Finds `filename` in the session: final video, transcript, audio, then
    /// scene clips.
    pub fn resolve(&self, session: &str, filename: &str) -> Result<Artifact, ArtifactError> {
        if !is_plain_file_name(filename) {
            return Err(ArtifactError::InvalidName);
        }
        let (session, dir) = self.session_dir(session)?;

        let candidate = match filename {
            FINAL_VIDEO_FILE | SCRIPT_FILE | AUDIO_FILE => dir.join(filename),
            _ => dir.join("scenes").join(filename),
        };
        let path = canonical(&candidate)?;
        if !path.starts_with(&dir) {
            return Err(ArtifactError::Traversal(path));
        }
        if !path.is_file() {
            return Err(ArtifactError::NotFound);
        }

        let download_name = if filename == FINAL_VIDEO_FILE {
            format!("{} full video.mp4", display_name(&session))
        } else {
            filename.to_owned()
        };
        Ok(Artifact {
            path,
            download_name,
        })
    }

    /// Writes `bundle.zip` with every scene clip, the transcript, the audio
    /// and the final video, and returns it.
    pub async fn bundle(&self, session: &str) -> Result<Artifact, ArtifactError> {
        let (session, dir) = self.session_dir(session)?;
        let download_name = format!("{} render video.zip", display_name(&session));
        let final_name = format!("{} full video.mp4", display_name(&session));

        let path = tokio::task::spawn_blocking(move || write_bundle(&dir, &final_name))
            .await
            .context("bundle task panicked")??;
        Ok(Artifact {
            path,
            download_name,
        })
    }
}

static BUNDLE_SEQ: AtomicU64 = AtomicU64::new(0);

fn write_bundle(dir: &Path, final_name: &str) -> anyhow::Result<PathBuf> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    let scenes = dir.join("scenes");
    if scenes.is_dir() {
        let mut clips: Vec<PathBuf> = fs::read_dir(&scenes)
            .with_context(|| format!("failed to list {}", scenes.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file())
            .collect();
        clips.sort();
        for clip in clips {
            if let Some(name) = clip.file_name().and_then(|name| name.to_str()) {
                entries.push((format!("scenes/{name}"), clip.clone()));
            }
        }
    }
    for (name, file) in [
        (SCRIPT_FILE.to_owned(), dir.join(SCRIPT_FILE)),
        (AUDIO_FILE.to_owned(), dir.join(AUDIO_FILE)),
        (final_name.to_owned(), dir.join(FINAL_VIDEO_FILE)),
    ] {
        if file.is_file() {
            entries.push((name, file));
        }
    }

    // Concurrent requests each write their own file; readers only ever see a
    // finished archive at `bundle.zip`.
    let bundle = dir.join("bundle.zip");
    let partial = dir.join(format!(
        ".bundle-{}-{}.zip.partial",
        std::process::id(),
        BUNDLE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    if let Err(error) = write_zip(&partial, entries) {
        let _ = fs::remove_file(&partial);
        return Err(error);
    }
    fs::rename(&partial, &bundle)
        .with_context(|| format!("failed to move bundle into {}", bundle.display()))?;
    Ok(bundle)
}

fn write_zip(path: &Path, entries: Vec<(String, PathBuf)>) -> anyhow::Result<()> {
    let out = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut zip = ZipWriter::new(out);
    // Video is already compressed; only the small text files are deflated.
    for (name, file) in entries {
        let method = if name.ends_with(".txt") {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(true);
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("failed to add {name} to bundle"))?;
        let mut source =
            File::open(&file).with_context(|| format!("failed to open {}", file.display()))?;
        io::copy(&mut source, &mut zip)
            .with_context(|| format!("failed to write {name} into bundle"))?;
    }
    zip.finish().context("failed to finalize bundle")?;
    Ok(())
}

fn canonical(path: &Path) -> Result<PathBuf, ArtifactError> {
    match fs::canonicalize(path) {
        Ok(path) => Ok(path),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Err(ArtifactError::NotFound),
        Err(error) => Err(ArtifactError::Io(
            anyhow::Error::new(error).context(format!("failed to resolve {}", path.display())),
        )),
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

fn display_name(session: &SessionId) -> String {
    session.as_str().replace('_', " ")
}
