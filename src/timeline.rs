use std::fmt::Write as _;

use serde::Serialize;
use url::Url;

use crate::captions::CaptionStyle;

pub const DEFAULT_TRANSITION_KIND: &str = "fade";
pub const DEFAULT_TRANSITION_SECONDS: f64 = 0.5;

/// One validated still-image segment of the output video.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    /// 1-based position in the timeline.
    pub index: usize,
    pub image_url: Url,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub start_label: String,
    pub end_label: String,
    pub text: Option<String>,
    /// Text to burn in, when captions are enabled for this scene.
    pub caption: Option<String>,
}

impl Scene {
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Zero-padded index used for every per-scene file name.
    pub fn stem(&self) -> String {
        scene_stem(self.index)
    }
}

pub fn scene_stem(index: usize) -> String {
    format!("scene_{index:03}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: String,
    pub duration: f64,
}

impl Default for Transition {
    fn default() -> Self {
        Self {
            kind: DEFAULT_TRANSITION_KIND.to_owned(),
            duration: DEFAULT_TRANSITION_SECONDS,
        }
    }
}

/// A render request after validation. Read-only for the rest of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub project_name: Option<String>,
    pub scenes: Vec<Scene>,
    pub audio: Option<String>,
    pub transition: Transition,
    /// Present when captions are enabled.
    pub caption_style: Option<CaptionStyle>,
    pub render_full_video: bool,
}

impl RenderPlan {
    /// End of the last scene; the timeline always starts at zero.
    pub fn total_seconds(&self) -> f64 {
        self.scenes
            .last()
            .map(|scene| scene.end_seconds)
            .unwrap_or_default()
    }

    pub fn durations(&self) -> Vec<f64> {
        self.scenes.iter().map(Scene::duration).collect()
    }

    pub fn title(&self) -> &str {
        self.project_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("Untitled")
    }

    /// Plain-text transcript written next to the rendered clips.
    pub fn transcript(&self) -> String {
        let mut script = String::new();
        let _ = writeln!(script, "Title: {}", self.title());
        let _ = writeln!(script, "Total Duration: {}", format_time(self.total_seconds()));
        let _ = writeln!(script, "Total Scenes: {}", self.scenes.len());
        let _ = write!(script, "\n{}\n\n", "=".repeat(60));

        for scene in &self.scenes {
            let _ = writeln!(
                script,
                "[Scene {}: {} - {}]",
                scene.index, scene.start_label, scene.end_label
            );
            let _ = writeln!(script, "Duration: {:.2}s", scene.duration());
            if let Some(text) = scene.text.as_deref().filter(|text| !text.is_empty()) {
                let _ = write!(script, "\n{text}\n");
            }
            let _ = write!(script, "\n{}\n\n", "-".repeat(60));
        }
        script
    }
}

/// `M:SS` below an hour, `H:MM:SS` from one hour on.
pub fn format_time(seconds: f64) -> String {
    let whole = seconds.max(0.0).floor() as u64;
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let secs = whole % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(index: usize, start: f64, end: f64, text: Option<&str>) -> Scene {
        Scene {
            index,
            image_url: Url::parse("https://img.test/a.jpg").unwrap(),
            start_seconds: start,
            end_seconds: end,
            start_label: format_time(start),
            end_label: format_time(end),
            text: text.map(str::to_owned),
            caption: None,
        }
    }

    #[test]
    fn format_time_switches_to_hours() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(65.9), "1:05");
        assert_eq!(format_time(3600.0), "1:00:00");
        assert_eq!(format_time(7199.0), "1:59:59");
    }

    #[test]
    fn stems_are_zero_padded() {
        assert_eq!(scene_stem(1), "scene_001");
        assert_eq!(scene_stem(120), "scene_120");
    }

    #[test]
    fn transcript_lists_every_scene() {
        let plan = RenderPlan {
            project_name: Some("  ".to_owned()),
            scenes: vec![
                scene(1, 0.0, 5.0, Some("Hello there")),
                scene(2, 5.0, 12.5, None),
            ],
            audio: None,
            transition: Transition::default(),
            caption_style: None,
            render_full_video: true,
        };
        let script = plan.transcript();
        assert!(script.starts_with("Title: Untitled\nTotal Duration: 0:12\nTotal Scenes: 2\n"));
        assert!(script.contains("[Scene 1: 0:00 - 0:05]\nDuration: 5.00s\n\nHello there\n"));
        assert!(script.contains("[Scene 2: 0:05 - 0:12]\nDuration: 7.50s\n\n---"));
        assert_eq!(script.matches(&"-".repeat(60)).count(), 2);
    }
}
