//! storyreel renders a sequence of still images, a voice-over track and
//! per-scene timing into normalized 1080p scene clips and a crossfaded full
//! video, driving an external `ffmpeg` through a hardware/software encoder
//! ladder.

pub mod artifacts;
pub mod captions;
pub mod compositor;
pub mod config;
pub mod error;
pub mod failure;
pub mod fallback;
pub mod ffmpeg;
pub mod filter_graph;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod scene_encoder;
pub mod server;
pub mod session;
pub mod staging;
pub mod tier;
pub mod timeline;

pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
pub use ffmpeg::{EncoderInvocation, EncoderRunner, FfmpegRunner, InvocationOutcome};
pub use pipeline::RenderPipeline;
pub use request::RenderRequest;
pub use response::RenderResponse;
