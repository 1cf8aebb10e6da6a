//! GStreamer pipeline for the live camera.
//!
//! `camera source ! [caps] ! videoconvert ! appsink(RGBA)`. The sink keeps
//! only the newest buffer, so the detection loop never falls behind and a
//! still capture always gets the most recent frame.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gstreamer_video::VideoFrameExt;
use thiserror::Error;

use super::frame::Frame;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("GStreamer error: {0}")]
    Gstreamer(#[from] glib::Error),
    #[error("GStreamer bool error: {0}")]
    GstreamerBool(#[from] glib::BoolError),
    #[error("Failed to create element: {0}")]
    ElementCreation(String),
    #[error("Sample has no usable video caps")]
    NoCaps,
    #[error("Sample has no buffer")]
    NoBuffer,
    #[error("State change failed")]
    StateChange,
}

/// Camera selection and requested capture size
#[derive(Debug, Clone, Default)]
pub struct CameraConfig {
    pub device: Option<String>,
    pub resolution: Option<(u32, u32)>,
}

/// Live camera pipeline
pub struct CameraPipeline {
    pipeline: gst::Pipeline,
    sink: gst_app::AppSink,
    latest: Option<Frame>,
}

impl CameraPipeline {
    pub fn new(config: &CameraConfig) -> Result<Self, PipelineError> {
        gst::init()?;

        let pipeline = gst::Pipeline::new();

        let source = match config.device {
            Some(ref device) => gst::ElementFactory::make("v4l2src")
                .property("device", device)
                .build()
                .map_err(|_| PipelineError::ElementCreation("v4l2src".into()))?,
            None => gst::ElementFactory::make("autovideosrc")
                .build()
                .map_err(|_| PipelineError::ElementCreation("autovideosrc".into()))?,
        };

        let mut caps = gst::Caps::builder("video/x-raw");
        if let Some((width, height)) = config.resolution {
            caps = caps.field("width", width as i32).field("height", height as i32);
        }
        let filter = gst::ElementFactory::make("capsfilter")
            .property("caps", caps.build())
            .build()
            .map_err(|_| PipelineError::ElementCreation("capsfilter".into()))?;

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|_| PipelineError::ElementCreation("videoconvert".into()))?;

        let sink = gst_app::AppSink::builder()
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .max_buffers(1)
            .drop(true)
            .sync(false)
            .build();

        pipeline.add_many([&source, &filter, &convert, sink.upcast_ref()])?;
        gst::Element::link_many([&source, &filter, &convert, sink.upcast_ref()])?;

        Ok(Self {
            pipeline,
            sink,
            latest: None,
        })
    }

    /// Start the pipeline
    pub fn play(&self) -> Result<(), PipelineError> {
        log::info!("Starting camera pipeline");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| PipelineError::StateChange)?;
        Ok(())
    }

    /// Stop the pipeline and drop the cached frame
    pub fn stop(&mut self) {
        log::info!("Stopping camera pipeline");
        self.latest = None;
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop camera pipeline: {:?}", e);
        }
    }

    /// Drain the bus and report the first error or end-of-stream, if any
    pub fn poll_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) =
            bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
        {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    log::error!(
                        "Camera error from {:?}: {} ({:?})",
                        err.src().map(|s| s.path_string()),
                        err.error(),
                        err.debug()
                    );
                    return Some(err.error().to_string());
                }
                gst::MessageView::Eos(..) => return Some("camera stream ended".into()),
                _ => {}
            }
        }
        None
    }

    /// Newest frame: pulls a fresh sample if one is waiting, else the cached one
    pub fn latest_frame(&mut self) -> Option<&Frame> {
        if let Some(sample) = self.sink.try_pull_sample(gst::ClockTime::ZERO) {
            match frame_from_sample(&sample) {
                Ok(frame) => self.latest = Some(frame),
                Err(e) => log::warn!("Dropping camera sample: {}", e),
            }
        }
        self.latest.as_ref()
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Copy a sample into a tightly packed RGBA frame (row stride may be padded)
fn frame_from_sample(sample: &gst::Sample) -> Result<Frame, PipelineError> {
    let caps = sample.caps().ok_or(PipelineError::NoCaps)?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| PipelineError::NoCaps)?;
    let buffer = sample.buffer().ok_or(PipelineError::NoBuffer)?;
    let video = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)?;

    let width = info.width();
    let height = info.height();
    let stride = video.plane_stride()[0] as usize;
    let plane = video.plane_data(0)?;
    let row_len = width as usize * 4;

    let mut data = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_len;
        if end > plane.len() {
            return Err(PipelineError::NoBuffer);
        }
        data.extend_from_slice(&plane[start..end]);
    }

    Ok(Frame::new(data, width, height))
}
