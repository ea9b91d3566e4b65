use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::timeline::{scene_stem, RenderPlan};

const GENERIC_TITLES: &[&str] = &["Untitled", "unnamed", "untitled"];
const TITLE_WORDS: usize = 3;
/// Longest id accepted by [`SessionId::parse`] and produced by [`SessionId::derive`].
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Workspace directory name and external handle of one render session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// First three alphanumeric words of the project title, or of the first
    /// scene's text when the title is missing or generic, else a timestamp.
    pub fn derive(plan: &RenderPlan) -> Self {
        let title = plan
            .project_name
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty() && !GENERIC_TITLES.contains(&title));

        let source = match title {
            Some(title) => Some(title),
            None => plan.scenes.first().and_then(|scene| scene.text.as_deref()),
        };
        source
            .and_then(leading_words)
            .map(Self)
            .unwrap_or_else(Self::generated)
    }

    pub fn generated() -> Self {
        Self(format!("Video_{}", chrono::Utc::now().timestamp_millis()))
    }

    /// Accepts an externally supplied id only if it is a single safe path
    /// component.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        valid.then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn leading_words(text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .take(TITLE_WORDS)
        .map(|word| word.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect();
    let mut id = words.join("_");
    // Only ASCII survives the filter above, so byte truncation is char-safe.
    id.truncate(MAX_SESSION_ID_LEN);
    let id = id.trim_end_matches('_');
    (!id.is_empty()).then(|| id.to_owned())
}

/// Paths inside one session's workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn at(output_root: &Path, session: &SessionId) -> Self {
        Self {
            root: output_root.join(session.as_str()),
        }
    }

    /// Destroys any stale directory of the same name, then recreates the layout.
    pub async fn create_fresh(output_root: &Path, session: &SessionId) -> Result<Self> {
        let workspace = Self::at(output_root, session);
        if tokio::fs::try_exists(&workspace.root).await.unwrap_or(false) {
            debug!(path = %workspace.root.display(), "removing stale workspace");
            tokio::fs::remove_dir_all(&workspace.root)
                .await
                .with_context(|| {
                    format!("failed to remove stale workspace {}", workspace.root.display())
                })?;
        }
        for dir in [
            workspace.images_dir(),
            workspace.scenes_dir(),
            workspace.captions_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn scenes_dir(&self) -> PathBuf {
        self.root.join("scenes")
    }

    pub fn captions_dir(&self) -> PathBuf {
        self.root.join("captions")
    }

    pub fn image_path(&self, index: usize, extension: &str) -> PathBuf {
        self.images_dir()
            .join(format!("{}.{extension}", scene_stem(index)))
    }

    pub fn clip_path(&self, index: usize) -> PathBuf {
        self.scenes_dir().join(format!("{}.mp4", scene_stem(index)))
    }

    pub fn caption_path(&self, index: usize) -> PathBuf {
        self.captions_dir().join(format!("{}.txt", scene_stem(index)))
    }

    pub fn audio_path(&self) -> PathBuf {
        self.root.join(AUDIO_FILE)
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join(SCRIPT_FILE)
    }

    pub fn merged_path(&self) -> PathBuf {
        self.root.join("merged_video.mp4")
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join(FINAL_VIDEO_FILE)
    }

    pub fn concat_manifest_path(&self) -> PathBuf {
        self.root.join("concat.txt")
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.root.join("bundle.zip")
    }
}

pub const FINAL_VIDEO_FILE: &str = "final_video.mp4";
pub const SCRIPT_FILE: &str = "script.txt";
pub const AUDIO_FILE: &str = "audio.mp3";

/// Delayed workspace deletion, one pending task per session id.
#[derive(Debug, Clone, Default)]
pub struct CleanupScheduler {
    pending: Arc<Mutex<HashMap<SessionId, JoinHandle<()>>>>,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules removal of `dir` after `retention`, replacing any earlier
    /// schedule for the same session.
    pub fn schedule(&self, session: &SessionId, dir: PathBuf, retention: Duration) {
        let pending = Arc::clone(&self.pending);
        let key = session.clone();

        // The task removes its own entry, so it must not run before the insert.
        let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            remove_dir_logged(&dir).await;
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        });
        let previous = guard.insert(session.clone(), handle);
        drop(guard);

        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            session = %session,
            retention_secs = retention.as_secs(),
            "scheduled workspace cleanup"
        );
    }

    /// Returns true when a pending cleanup was cancelled.
    pub fn cancel(&self, session: &SessionId) -> bool {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(session = %session, "cancelled scheduled cleanup");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, session: &SessionId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session)
    }

    /// Cancels any schedule and removes the workspace now. Best effort.
    pub async fn discard(&self, session: &SessionId, dir: &Path) {
        self.cancel(session);
        remove_dir_logged(dir).await;
    }
}

/// Session ids with a render in flight. A workspace belongs to at most one
/// running session.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    running: Arc<Mutex<HashSet<SessionId>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `session` as running until the returned claim is dropped, or
    /// returns `None` when another render already holds it.
    pub fn claim(&self, session: &SessionId) -> Option<SessionClaim> {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.clone());
        inserted.then(|| SessionClaim {
            running: Arc::clone(&self.running),
            session: session.clone(),
        })
    }

    pub fn is_running(&self, session: &SessionId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session)
    }
}

#[derive(Debug)]
pub struct SessionClaim {
    running: Arc<Mutex<HashSet<SessionId>>>,
    session: SessionId,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session);
    }
}

async fn remove_dir_logged(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!(path = %dir.display(), "removed workspace"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(path = %dir.display(), %error, "failed to remove workspace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{Scene, Transition};
    use url::Url;

    fn plan(title: Option<&str>, first_text: Option<&str>) -> RenderPlan {
        RenderPlan {
            project_name: title.map(str::to_owned),
            scenes: vec![Scene {
                index: 1,
                image_url: Url::parse("https://img.test/1.jpg").unwrap(),
                start_seconds: 0.0,
                end_seconds: 5.0,
                start_label: "0:00".to_owned(),
                end_label: "0:05".to_owned(),
                text: first_text.map(str::to_owned),
                caption: None,
            }],
            audio: None,
            transition: Transition::default(),
            caption_style: None,
            render_full_video: false,
        }
    }

    #[test]
    fn session_id_uses_first_three_title_words() {
        let id = SessionId::derive(&plan(Some("  My Great: Story of Time "), None));
        assert_eq!(id.as_str(), "My_Great_Story");
    }

    #[test]
    fn generic_titles_fall_back_to_scene_text() {
        let id = SessionId::derive(&plan(Some("Untitled"), Some("Once upon a time")));
        assert_eq!(id.as_str(), "Once_upon_a");
        let id = SessionId::derive(&plan(None, Some("!!! ???")));
        assert!(id.as_str().starts_with("Video_"));
        let id = SessionId::derive(&plan(Some("--- ***"), Some("ignored text")));
        assert!(id.as_str().starts_with("Video_"));
    }

    #[test]
    fn long_titles_are_capped_to_a_parseable_id() {
        let title = format!("{} second third", "A".repeat(150));
        let id = SessionId::derive(&plan(Some(&title), None));
        assert_eq!(id.as_str(), "A".repeat(MAX_SESSION_ID_LEN));
        assert_eq!(SessionId::parse(id.as_str()), Some(id.clone()));

        let title = format!("{} tail words", "B".repeat(MAX_SESSION_ID_LEN - 1));
        let id = SessionId::derive(&plan(Some(&title), None));
        assert_eq!(id.as_str(), "B".repeat(MAX_SESSION_ID_LEN - 1));
    }

    #[test]
    fn parse_rejects_traversal() {
        assert!(SessionId::parse("My_Great_Story").is_some());
        assert!(SessionId::parse("..").is_none());
        assert!(SessionId::parse("a/b").is_none());
        assert!(SessionId::parse("").is_none());
    }

    #[tokio::test]
    async fn create_fresh_replaces_stale_directories() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::parse("Stale_Session").unwrap();
        let stale = dir.path().join("Stale_Session").join("leftover.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let workspace = Workspace::create_fresh(dir.path(), &session).await.unwrap();
        assert!(!stale.exists());
        assert!(workspace.scenes_dir().is_dir());
        assert!(workspace.images_dir().is_dir());
        assert_eq!(
            workspace.clip_path(3),
            dir.path().join("Stale_Session/scenes/scene_003.mp4")
        );
    }

    #[test]
    fn a_session_id_is_claimed_once_at_a_time() {
        let active = ActiveSessions::new();
        let session = SessionId::parse("Same_Title").unwrap();

        let claim = active.claim(&session).unwrap();
        assert!(active.claim(&session).is_none());
        assert!(active.is_running(&session));

        drop(claim);
        assert!(!active.is_running(&session));
        assert!(active.claim(&session).is_some());
    }

    #[tokio::test]
    async fn zero_retention_cleanup_leaves_nothing_pending() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CleanupScheduler::new();
        for round in 0..20 {
            let target = dir.path().join(format!("session_{round}"));
            std::fs::create_dir_all(&target).unwrap();
            let session = SessionId::parse(&format!("session_{round}")).unwrap();
            scheduler.schedule(&session, target, Duration::ZERO);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        for round in 0..20 {
            let session = SessionId::parse(&format!("session_{round}")).unwrap();
            assert!(!scheduler.is_pending(&session));
            assert!(!dir.path().join(format!("session_{round}")).exists());
        }
    }

    #[tokio::test]
    async fn scheduled_cleanup_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("session");
        std::fs::create_dir_all(&target).unwrap();
        let session = SessionId::parse("session").unwrap();

        let scheduler = CleanupScheduler::new();
        scheduler.schedule(&session, target.clone(), Duration::from_millis(20));
        assert!(scheduler.is_pending(&session));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!target.exists());
        assert!(!scheduler.is_pending(&session));
    }

    #[tokio::test]
    async fn cancelled_cleanup_keeps_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("session");
        std::fs::create_dir_all(&target).unwrap();
        let session = SessionId::parse("session").unwrap();

        let scheduler = CleanupScheduler::new();
        scheduler.schedule(&session, target.clone(), Duration::from_millis(20));
        assert!(scheduler.cancel(&session));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(target.exists());
        assert!(!scheduler.cancel(&session));
    }

    #[tokio::test]
    async fn discard_removes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("session");
        std::fs::create_dir_all(&target).unwrap();
        let session = SessionId::parse("session").unwrap();

        let scheduler = CleanupScheduler::new();
        scheduler.schedule(&session, target.clone(), Duration::from_secs(3600));
        scheduler.discard(&session, &target).await;
        assert!(!target.exists());
        assert!(!scheduler.is_pending(&session));
    }
}
