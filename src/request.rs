use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::captions::CaptionStyle;
use crate::error::{RenderError, RenderResult};
use crate::timeline::{
    format_time, RenderPlan, Scene, Transition, DEFAULT_TRANSITION_KIND,
    DEFAULT_TRANSITION_SECONDS,
};

/// Render request as received over the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default)]
    pub scenes: Option<Vec<SceneRequest>>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub transition: Option<TransitionRequest>,
    #[serde(default)]
    pub render_full_video: bool,
    #[serde(default)]
    pub captions: Option<CaptionRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRequest {
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionRequest {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionRequest {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub texts: Vec<String>,
}

impl RenderRequest {
    /// Validates the request without touching the filesystem or network.
    pub fn into_plan(self, max_total_seconds: u32) -> RenderResult<RenderPlan> {
        let scenes = self.scenes.unwrap_or_default();
        let last = scenes.last().ok_or(RenderError::EmptyScenes)?;

        let total = last.end_seconds;
        if !total.is_finite() || total > f64::from(max_total_seconds) {
            return Err(RenderError::DurationExceeded {
                limit: max_total_seconds,
                minutes: (total.max(0.0) / 60.0).round() as u64,
            });
        }

        let caption_style = self
            .captions
            .as_ref()
            .filter(|captions| captions.enabled)
            .map(|captions| {
                captions
                    .style
                    .as_deref()
                    .map(CaptionStyle::from_name)
                    .unwrap_or_default()
            });
        let caption_texts = self
            .captions
            .map(|captions| captions.texts)
            .unwrap_or_default();

        let mut validated = Vec::with_capacity(scenes.len());
        for (position, scene) in scenes.into_iter().enumerate() {
            let index = position + 1;
            let image_url = parse_image_url(index, scene.image_url.as_deref())?;
            if !scene.start_seconds.is_finite()
                || !scene.end_seconds.is_finite()
                || scene.end_seconds <= scene.start_seconds
            {
                return Err(RenderError::InvalidTiming { scene: index });
            }

            let caption = caption_style.and_then(|_| {
                caption_texts
                    .get(position)
                    .map(|text| text.trim())
                    .filter(|text| !text.is_empty())
                    .map(str::to_owned)
            });

            validated.push(Scene {
                index,
                image_url,
                start_label: scene
                    .start_time
                    .unwrap_or_else(|| format_time(scene.start_seconds)),
                end_label: scene
                    .end_time
                    .unwrap_or_else(|| format_time(scene.end_seconds)),
                start_seconds: scene.start_seconds,
                end_seconds: scene.end_seconds,
                text: scene.text,
                caption,
            });
        }

        // Only a merge of two or more clips crossfades.
        let shortest_scene = (validated.len() > 1)
            .then(|| validated.iter().map(Scene::duration).fold(f64::INFINITY, f64::min));
        let transition = resolve_transition(self.transition, shortest_scene)?;

        Ok(RenderPlan {
            project_name: self.project_name,
            scenes: validated,
            audio: self.audio_url.filter(|audio| !audio.trim().is_empty()),
            transition,
            caption_style,
            render_full_video: self.render_full_video,
        })
    }
}

fn parse_image_url(scene: usize, raw: Option<&str>) -> RenderResult<Url> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && *raw != "error")
        .ok_or(RenderError::MissingImage { scene })?;
    let url = Url::parse(raw).map_err(|_| RenderError::UnsupportedImageScheme { scene })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(RenderError::UnsupportedImageScheme { scene }),
    }
}

/// A crossfade must be shorter than every scene it joins, or the merged
/// timeline would shrink past the clips it overlaps.
fn resolve_transition(
    request: Option<TransitionRequest>,
    shortest_scene: Option<f64>,
) -> RenderResult<Transition> {
    let request = request.unwrap_or_default();
    let duration = request.duration.unwrap_or(DEFAULT_TRANSITION_SECONDS);
    if !duration.is_finite()
        || duration <= 0.0
        || shortest_scene.is_some_and(|shortest| duration >= shortest)
    {
        return Err(RenderError::InvalidTransition);
    }

    let kind = match request.kind.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_TRANSITION_KIND.to_owned(),
        Some(kind) if kind.bytes().all(|byte| byte.is_ascii_lowercase()) => kind.to_owned(),
        Some(kind) => {
            warn!(requested = kind, "unsupported transition type, using fade");
            DEFAULT_TRANSITION_KIND.to_owned()
        }
    };
    Ok(Transition { kind, duration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> RenderRequest {
        serde_json::from_value(value).unwrap()
    }

    fn scene_json(start: f64, end: f64, url: &str) -> serde_json::Value {
        json!({ "imageUrl": url, "startSeconds": start, "endSeconds": end })
    }

    #[test]
    fn missing_scene_list_is_rejected() {
        let error = request(json!({})).into_plan(7200).unwrap_err();
        assert!(matches!(error, RenderError::EmptyScenes));
        let error = request(json!({ "scenes": [] })).into_plan(7200).unwrap_err();
        assert!(matches!(error, RenderError::EmptyScenes));
    }

    #[test]
    fn over_two_hours_reports_minutes() {
        let error = request(json!({
            "scenes": [scene_json(0.0, 7260.0, "https://img.test/1.jpg")]
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(
            error,
            RenderError::DurationExceeded {
                limit: 7200,
                minutes: 121
            }
        ));
        assert!(error.to_string().contains("121 minutes"));
    }

    #[test]
    fn image_references_are_checked_per_scene() {
        let error = request(json!({
            "scenes": [
                scene_json(0.0, 5.0, "https://img.test/1.jpg"),
                scene_json(5.0, 10.0, "error"),
            ]
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(error, RenderError::MissingImage { scene: 2 }));

        let error = request(json!({
            "scenes": [scene_json(0.0, 5.0, "file:///etc/passwd")]
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(error, RenderError::UnsupportedImageScheme { scene: 1 }));
    }

    #[test]
    fn scenes_must_end_after_they_start() {
        let error = request(json!({
            "scenes": [scene_json(3.0, 3.0, "https://img.test/1.jpg")]
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(error, RenderError::InvalidTiming { scene: 1 }));
    }

    #[test]
    fn transition_defaults_and_sanitizes_type() {
        let plan = request(json!({
            "scenes": [scene_json(0.0, 5.0, "https://img.test/1.jpg")]
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.transition, Transition::default());

        let plan = request(json!({
            "scenes": [scene_json(0.0, 5.0, "https://img.test/1.jpg")],
            "transition": { "type": "fade[x];[y]", "duration": 1.0 }
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.transition.kind, "fade");
        assert_eq!(plan.transition.duration, 1.0);

        let error = request(json!({
            "scenes": [scene_json(0.0, 5.0, "https://img.test/1.jpg")],
            "transition": { "type": "wipeleft", "duration": 0.0 }
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(error, RenderError::InvalidTransition));
    }

    #[test]
    fn transition_must_be_shorter_than_every_joined_scene() {
        let scenes = json!([
            scene_json(0.0, 5.0, "https://img.test/1.jpg"),
            scene_json(5.0, 6.5, "https://img.test/2.jpg"),
            scene_json(6.5, 12.0, "https://img.test/3.jpg"),
        ]);
        let error = request(json!({
            "scenes": scenes,
            "transition": { "type": "fade", "duration": 1.5 }
        }))
        .into_plan(7200)
        .unwrap_err();
        assert!(matches!(error, RenderError::InvalidTransition));
        assert!(error.is_rejection());

        let plan = request(json!({
            "scenes": scenes,
            "transition": { "type": "fade", "duration": 1.4 }
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.transition.duration, 1.4);

        // Nothing is crossfaded with a single scene.
        let plan = request(json!({
            "scenes": [scene_json(0.0, 1.0, "https://img.test/1.jpg")],
            "transition": { "type": "fade", "duration": 3.0 }
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.transition.duration, 3.0);
    }

    #[test]
    fn captions_attach_only_when_enabled_and_non_blank() {
        let plan = request(json!({
            "scenes": [
                scene_json(0.0, 5.0, "https://img.test/1.jpg"),
                scene_json(5.0, 10.0, "https://img.test/2.jpg"),
            ],
            "captions": { "enabled": true, "style": "neon", "texts": ["First", "  "] }
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.caption_style, Some(CaptionStyle::Neon));
        assert_eq!(plan.scenes[0].caption.as_deref(), Some("First"));
        assert_eq!(plan.scenes[1].caption, None);

        let plan = request(json!({
            "scenes": [scene_json(0.0, 5.0, "https://img.test/1.jpg")],
            "captions": { "enabled": false, "texts": ["First"] }
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.caption_style, None);
        assert_eq!(plan.scenes[0].caption, None);
    }

    #[test]
    fn time_labels_fall_back_to_formatted_seconds() {
        let plan = request(json!({
            "scenes": [{
                "imageUrl": "https://img.test/1.jpg",
                "startSeconds": 0.0,
                "endSeconds": 65.0,
                "endTime": "01:05"
            }],
            "audioUrl": ""
        }))
        .into_plan(7200)
        .unwrap();
        assert_eq!(plan.scenes[0].start_label, "0:00");
        assert_eq!(plan.scenes[0].end_label, "01:05");
        assert_eq!(plan.audio, None);
    }
}
