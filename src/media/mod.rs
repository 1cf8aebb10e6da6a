//! Camera capture and audio cues.

pub mod cue;
pub mod frame;
pub mod pipeline;

pub use frame::Frame;
pub use pipeline::{CameraConfig, CameraPipeline};
