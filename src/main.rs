//! ToonBooth kiosk - headless photo-booth controller.
//!
//! Architecture:
//! - `state` module: I/O-free capture state machine (testable)
//! - `app` module: Bridges the state machine to the camera, backend and operator input
//! - `api` module: HTTP client for stylization, sheets and telemetry
//! - `face` module: Face detection seam and the stability tracker
//! - `media` module: GStreamer camera pipeline, still encoding and audio cues

mod api;
mod app;
mod config;
mod face;
mod media;
mod state;

use api::ApiClient;
use app::AppContext;
use config::KioskSettings;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting ToonBooth kiosk");

    let settings = match KioskSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let base = match settings.api_base_url() {
        Ok(url) => url,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    log::info!("Backend at {}", base);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let detector = match face::load_detector(settings.detector_model.as_deref()) {
        Ok(detector) => detector,
        Err(e) => {
            log::warn!("Face detector unavailable: {}", e);
            None
        }
    };

    // The detector is not Send, so the dispatch loop runs on this thread
    let (ctx, rx) = AppContext::new(settings, ApiClient::new(base), detector);
    runtime.block_on(ctx.run(rx));

    log::info!("ToonBooth kiosk shutting down");
}
