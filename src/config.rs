use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::ffmpeg::FfmpegMode;
use crate::tier::EncoderTier;

/// Encoder diagnostics that mean "these inputs cannot be crossfaded", as
/// opposed to a broken encode.
pub const DEFAULT_COMPATIBILITY_SIGNATURES: &[&str] = &[
    r"constant frame rate",
    r"current rate of \d+/\d+ is invalid",
    r"please use fps filter",
    r"timebase .* do not match",
    r"failed to configure output pad on parsed_xfade",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RenderConfig {
    pub output_root: PathBuf,
    pub ffmpeg: FfmpegConfig,
    pub profile: OutputProfile,
    pub tiers: Vec<EncoderTier>,
    pub vaapi_device: String,
    pub batch_size: usize,
    pub scene_timeout: SceneTimeout,
    pub merge_timeout_secs: u64,
    pub mux_timeout_secs: u64,
    pub retention_secs: u64,
    pub max_total_seconds: u32,
    pub compatibility_signatures: Vec<String>,
    pub caption_font: String,
    pub http_timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("temp_renders"),
            ffmpeg: FfmpegConfig::default(),
            profile: OutputProfile::default(),
            tiers: EncoderTier::LADDER.to_vec(),
            vaapi_device: "/dev/dri/renderD128".to_owned(),
            batch_size: 4,
            scene_timeout: SceneTimeout::default(),
            merge_timeout_secs: 3600,
            mux_timeout_secs: 3600,
            retention_secs: 3600,
            max_total_seconds: 7200,
            compatibility_signatures: DEFAULT_COMPATIBILITY_SIGNATURES
                .iter()
                .map(|pattern| (*pattern).to_owned())
                .collect(),
            caption_font: "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_owned(),
            http_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FfmpegConfig {
    pub mode: FfmpegMode,
    pub path: Option<PathBuf>,
}

/// The fixed render profile every clip is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u32,
    pub hardware_quality: u32,
}

impl Default for OutputProfile {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 24,
            crf: 23,
            hardware_quality: 23,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SceneTimeout {
    pub per_second_secs: u64,
    pub floor_secs: u64,
    pub ceiling_secs: u64,
}

impl Default for SceneTimeout {
    fn default() -> Self {
        Self {
            per_second_secs: 30,
            floor_secs: 120,
            ceiling_secs: 1800,
        }
    }
}

impl SceneTimeout {
    /// Timeout for one scene encode, proportional to its duration and clamped.
    pub fn for_duration(&self, seconds: f64) -> Duration {
        let scaled = (seconds.max(0.0) * self.per_second_secs as f64).round() as u64;
        Duration::from_secs(scaled.clamp(self.floor_secs, self.ceiling_secs))
    }
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: RenderConfig = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let profile = &self.profile;
        if profile.width == 0 || profile.height == 0 {
            bail!(
                "profile resolution must be positive, got {}x{}",
                profile.width,
                profile.height
            );
        }
        if profile.width % 2 != 0 || profile.height % 2 != 0 {
            bail!("profile width/height must be even (required for yuv420p output)");
        }
        if profile.fps == 0 {
            bail!("profile fps must be > 0");
        }
        if self.tiers.is_empty() {
            bail!("at least one encoder tier must be configured");
        }
        for (index, tier) in self.tiers.iter().enumerate() {
            if self.tiers[..index].contains(tier) {
                bail!("encoder tier '{}' is listed more than once", tier.label());
            }
        }
        if self.batch_size == 0 {
            bail!("batch_size must be > 0");
        }
        let timeout = &self.scene_timeout;
        if timeout.floor_secs == 0 || timeout.floor_secs > timeout.ceiling_secs {
            bail!(
                "scene_timeout floor ({}) must be > 0 and <= ceiling ({})",
                timeout.floor_secs,
                timeout.ceiling_secs
            );
        }
        if self.merge_timeout_secs == 0 || self.mux_timeout_secs == 0 {
            bail!("merge and mux timeouts must be > 0");
        }
        if self.max_total_seconds == 0 {
            bail!("max_total_seconds must be > 0");
        }
        self.compatibility_patterns()?;
        Ok(())
    }

    pub fn compatibility_patterns(&self) -> Result<Vec<Regex>> {
        self.compatibility_signatures
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("invalid compatibility signature '{pattern}'"))
            })
            .collect()
    }

    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }

    pub fn mux_timeout(&self) -> Duration {
        Duration::from_secs(self.mux_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
