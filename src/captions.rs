use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ffmpeg::{path_arg, quote_filter_value};

/// Pixels between the caption baseline box and the bottom frame edge.
const BOTTOM_MARGIN_PX: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum CaptionStyle {
    #[default]
    Classic,
    Yellow,
    White,
    Gradient,
    Outlined,
    Neon,
    Shadow,
    Minimal,
    Colorful,
}

impl From<String> for CaptionStyle {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl CaptionStyle {
    /// Unknown names fall back to `Classic`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "yellow" => Self::Yellow,
            "white" => Self::White,
            "gradient" => Self::Gradient,
            "outlined" => Self::Outlined,
            "neon" => Self::Neon,
            "shadow" => Self::Shadow,
            "minimal" => Self::Minimal,
            "colorful" => Self::Colorful,
            _ => Self::Classic,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Yellow => "yellow",
            Self::White => "white",
            Self::Gradient => "gradient",
            Self::Outlined => "outlined",
            Self::Neon => "neon",
            Self::Shadow => "shadow",
            Self::Minimal => "minimal",
            Self::Colorful => "colorful",
        }
    }

    pub fn look(self) -> CaptionLook {
        let base = CaptionLook {
            font_size: 42,
            font_color: "white",
            box_fill: None,
            outline: None,
            shadow: None,
        };
        match self {
            Self::Classic => CaptionLook {
                box_fill: Some(("black@0.85", 10)),
                ..base
            },
            Self::Yellow => CaptionLook {
                shadow: Some(("black@0.8", 2, 2)),
                ..base
            },
            Self::White => CaptionLook {
                font_color: "black",
                box_fill: Some(("white@0.95", 10)),
                ..base
            },
            Self::Gradient => CaptionLook {
                font_size: 44,
                font_color: "#FFD700",
                ..base
            },
            Self::Outlined => CaptionLook {
                outline: Some((3, "black")),
                ..base
            },
            Self::Neon => CaptionLook {
                font_color: "#00f7ff",
                shadow: Some(("#00f7ff@0.8", 2, 2)),
                ..base
            },
            Self::Shadow => CaptionLook {
                box_fill: Some(("white@0.25", 8)),
                ..base
            },
            Self::Minimal => CaptionLook {
                shadow: Some(("black@0.8", 3, 3)),
                ..base
            },
            Self::Colorful => CaptionLook {
                box_fill: Some(("#667eea@1.0", 10)),
                ..base
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionLook {
    pub font_size: u32,
    pub font_color: &'static str,
    /// Box colour and border width.
    pub box_fill: Option<(&'static str, u32)>,
    /// Border width and colour.
    pub outline: Option<(u32, &'static str)>,
    /// Shadow colour, x and y offset.
    pub shadow: Option<(&'static str, i32, i32)>,
}

/// Builds a bottom-centred `drawtext` filter reading its text from `text_file`.
pub fn drawtext_filter(style: CaptionStyle, text_file: &Path, font_file: &str) -> String {
    let look = style.look();
    let mut filter = format!(
        "drawtext=fontfile={}:textfile={}:fontsize={}:fontcolor={}:x=(w-text_w)/2:y=h-th-{}",
        quote_filter_value(font_file),
        quote_filter_value(&path_arg(text_file)),
        look.font_size,
        look.font_color,
        BOTTOM_MARGIN_PX
    );
    if let Some((color, border)) = look.box_fill {
        filter.push_str(&format!(":box=1:boxcolor={color}:boxborderw={border}"));
    }
    if let Some((width, color)) = look.outline {
        filter.push_str(&format!(":borderw={width}:bordercolor={color}"));
    }
    if let Some((color, x, y)) = look.shadow {
        filter.push_str(&format!(":shadowcolor={color}:shadowx={x}:shadowy={y}"));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_style_names_fall_back_to_classic() {
        assert_eq!(CaptionStyle::from_name("NEON"), CaptionStyle::Neon);
        assert_eq!(CaptionStyle::from_name("comic-sans"), CaptionStyle::Classic);
        let parsed: CaptionStyle = serde_json::from_str("\"outlined\"").unwrap();
        assert_eq!(parsed, CaptionStyle::Outlined);
    }

    #[test]
    fn classic_caption_draws_a_box() {
        let filter = drawtext_filter(
            CaptionStyle::Classic,
            Path::new("/work/captions/scene_001.txt"),
            "/fonts/Bold.ttf",
        );
        assert!(filter.starts_with("drawtext=fontfile='/fonts/Bold.ttf'"));
        assert!(filter.contains("textfile='/work/captions/scene_001.txt'"));
        assert!(filter.contains("y=h-th-80"));
        assert!(filter.contains(":box=1:boxcolor=black@0.85:boxborderw=10"));
        assert!(!filter.contains("shadowcolor"));
    }

    #[test]
    fn outlined_and_shadow_styles_add_their_options() {
        let outlined = drawtext_filter(CaptionStyle::Outlined, Path::new("t.txt"), "f.ttf");
        assert!(outlined.contains(":borderw=3:bordercolor=black"));
        assert!(!outlined.contains(":box=1"));

        let minimal = drawtext_filter(CaptionStyle::Minimal, Path::new("t.txt"), "f.ttf");
        assert!(minimal.contains(":shadowcolor=black@0.8:shadowx=3:shadowy=3"));
    }

    #[test]
    fn neon_glow_is_offset() {
        let neon = drawtext_filter(CaptionStyle::Neon, Path::new("t.txt"), "f.ttf");
        assert!(neon.contains(":fontcolor=#00f7ff"));
        assert!(neon.contains(":shadowcolor=#00f7ff@0.8:shadowx=2:shadowy=2"));
    }
}
