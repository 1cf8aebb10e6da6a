//! Countdown beeps through GStreamer's test source.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;

use super::pipeline::PipelineError;

/// Play a short sine beep. Returns once the beep has been started; a
/// background task tears the pipeline down after `duration`.
pub fn play_cue(frequency_hz: u32, duration: Duration) -> Result<(), PipelineError> {
    gst::init()?;
    let pipeline = gst::parse::launch(&format!(
        "audiotestsrc wave=sine freq={} volume=0.2 ! audioconvert ! autoaudiosink",
        frequency_hz
    ))?;
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|_| PipelineError::StateChange)?;

    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = pipeline.set_state(gst::State::Null);
    });
    Ok(())
}
