//! Application context - bridges the I/O-free state machine with the camera,
//! the backend and operator input.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::api::{ApiClient, SheetFormat, StylizeOutcome};
use crate::config::{self, KioskSettings};
use crate::face::{self, FaceDetector, Size};
use crate::media::{self, CameraConfig, CameraPipeline};
use crate::state::{
    CaptureCommand, CaptureEvent, CaptureStateMachine, NoticeKind, TriggerMode,
};

/// Detection runs on frames no wider than this
const DETECTION_WIDTH: u32 = 640;

/// Delay before trying to reopen a failed camera
const CAMERA_RETRY_DELAY_MS: u64 = 2000;

/// Messages sent from async tasks and operator input to the dispatch loop
#[derive(Debug, Clone)]
pub enum AppMessage {
    /// Process a capture event through the state machine
    Event(CaptureEvent),
    /// Try to (re)open the camera
    RestartCamera,
    Quit,
}

/// Sender that can dispatch messages to the loop from any task
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<AppMessage>,
}

impl MessageSender {
    pub fn send(&self, msg: AppMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn event(&self, event: CaptureEvent) {
        self.send(AppMessage::Event(event));
    }
}

/// Application context - owns the state machine and everything it drives
pub struct AppContext {
    pub state_machine: CaptureStateMachine,
    pub api: ApiClient,
    pub settings: KioskSettings,
    camera: Option<CameraPipeline>,
    camera_config: CameraConfig,
    detector: Option<Box<dyn FaceDetector>>,
    message_tx: MessageSender,
}

impl AppContext {
    pub fn new(
        settings: KioskSettings,
        api: ApiClient,
        detector: Option<Box<dyn FaceDetector>>,
    ) -> (Self, mpsc::UnboundedReceiver<AppMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let state_machine = CaptureStateMachine::from_settings(&settings, detector.is_some());
        let camera_config = CameraConfig {
            device: settings.camera_device.clone(),
            resolution: settings.capture_resolution(),
        };

        let ctx = Self {
            state_machine,
            api,
            settings,
            camera: None,
            camera_config,
            detector,
            message_tx: MessageSender { tx },
        };

        (ctx, rx)
    }

    pub fn sender(&self) -> MessageSender {
        self.message_tx.clone()
    }

    /// Run the dispatch loop until `quit` or until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AppMessage>) {
        if !self.state_machine.auto_face_available() {
            log::warn!("No face detector available: auto-face capture disabled, using manual/timer capture");
        }

        self.probe_server();
        spawn_operator_input(self.sender(), self.settings.clone());
        self.open_camera();

        let mut detection =
            tokio::time::interval(Duration::from_millis(config::DETECTION_INTERVAL_MS));
        detection.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(AppMessage::Event(event)) => {
                        self.process_event(event);
                    }
                    Some(AppMessage::RestartCamera) => self.open_camera(),
                    Some(AppMessage::Quit) | None => break,
                },
                _ = detection.tick() => self.detection_pass(),
            }
        }

        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        log::info!("Dispatch loop finished");
    }

    /// Process an event and execute resulting commands
    pub fn process_event(&mut self, event: CaptureEvent) -> Vec<CaptureCommand> {
        let commands = self.state_machine.process(event);

        for cmd in &commands {
            self.execute_command(cmd.clone());
        }

        commands
    }

    fn open_camera(&mut self) {
        if let Some(mut old) = self.camera.take() {
            old.stop();
        }

        let opened = CameraPipeline::new(&self.camera_config).and_then(|camera| {
            camera.play()?;
            Ok(camera)
        });

        match opened {
            Ok(camera) => {
                self.camera = Some(camera);
                self.process_event(CaptureEvent::CameraReady);
            }
            Err(e) => {
                self.process_event(CaptureEvent::CameraFailed {
                    error: e.to_string(),
                });
                self.schedule_camera_restart();
            }
        }
    }

    fn schedule_camera_restart(&self) {
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(CAMERA_RETRY_DELAY_MS)).await;
            tx.send(AppMessage::RestartCamera);
        });
    }

    /// One detection-or-idle pass: refresh the cached frame, watch the camera
    /// bus, and run the detector only while the machine is tracking.
    fn detection_pass(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };

        if let Some(error) = camera.poll_error() {
            if let Some(mut camera) = self.camera.take() {
                camera.stop();
            }
            self.process_event(CaptureEvent::CameraFailed { error });
            self.schedule_camera_restart();
            return;
        }

        let tracking = self.state_machine.tracking_active();
        let Some(frame) = camera.latest_frame() else {
            return;
        };
        if !tracking {
            return;
        }
        let small = frame.downscaled(DETECTION_WIDTH);

        let Some(detector) = self.detector.as_mut() else {
            return;
        };
        let faces = detector.detect(&small.to_gray(), small.width, small.height);

        let overlay = Size::new(
            self.settings.overlay_width as f64,
            self.settings.overlay_height as f64,
        );
        let source = Size::new(small.width as f64, small.height as f64);
        let mut face = face::to_overlay(&faces, source, overlay);
        if self.settings.mirror_preview {
            face = face.map(|f| f.mirrored(overlay.width));
        }

        self.process_event(CaptureEvent::DetectionTick { face, overlay });
    }

    /// Execute a command from the state machine
    fn execute_command(&mut self, cmd: CaptureCommand) {
        match cmd {
            CaptureCommand::StartCountdown { countdown, seconds } => {
                let tx = self.message_tx.clone();
                log::info!("Countdown {} started ({}s)", countdown, seconds);

                tokio::spawn(async move {
                    for _ in 0..seconds {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        tx.event(CaptureEvent::CountdownTick { countdown });
                    }
                });
            }

            CaptureCommand::Cue { frequency_hz } => {
                let duration = Duration::from_millis(config::CUE_DURATION_MS);
                if let Err(e) = media::cue::play_cue(frequency_hz, duration) {
                    log::debug!("Countdown cue unavailable: {}", e);
                }
            }

            CaptureCommand::CaptureStill => {
                let tx = self.message_tx.clone();
                let frame = self
                    .camera
                    .as_mut()
                    .and_then(|camera| camera.latest_frame())
                    .cloned();

                let Some(frame) = frame else {
                    tx.event(CaptureEvent::CaptureFailed {
                        error: "No frame from camera".into(),
                    });
                    return;
                };

                log::info!("Capturing still {}x{}", frame.width, frame.height);
                tokio::spawn(async move {
                    let encoded = tokio::task::spawn_blocking(move || frame.to_png_data_uri()).await;
                    let event = match encoded {
                        Ok(Ok(image)) => CaptureEvent::StillCaptured { image },
                        Ok(Err(e)) => CaptureEvent::CaptureFailed {
                            error: e.to_string(),
                        },
                        Err(e) => CaptureEvent::CaptureFailed {
                            error: format!("Encoder task failed: {}", e),
                        },
                    };
                    tx.event(event);
                });
            }

            CaptureCommand::Stylize {
                session,
                image,
                attempt,
            } => {
                let tx = self.message_tx.clone();
                let api = self.api.clone();

                tokio::spawn(async move {
                    let event = match api.stylize(&image, attempt).await {
                        Ok(StylizeOutcome::Stylized { image, fallback }) => {
                            CaptureEvent::StylizeSucceeded {
                                session,
                                image,
                                fallback,
                            }
                        }
                        Ok(StylizeOutcome::Rejected { reason, metrics }) => {
                            log::info!(
                                "Capture rejected as {} (metrics {:?})",
                                reason.as_str(),
                                metrics
                            );
                            CaptureEvent::StylizeRejected { session, reason }
                        }
                        Err(e) => {
                            log::error!("Stylization failed: {}", e);
                            CaptureEvent::StylizeFailed {
                                session,
                                error: e.to_string(),
                            }
                        }
                    };
                    tx.event(event);
                });
            }

            CaptureCommand::ComposeSheet {
                session,
                image,
                options,
                format,
            } => {
                let tx = self.message_tx.clone();
                let api = self.api.clone();

                tokio::spawn(async move {
                    let result = api.compose_sheet(&image, &options, format).await;
                    let event = match (format, result) {
                        (SheetFormat::Image, Ok(sheet)) => {
                            CaptureEvent::SheetComposed { session, sheet }
                        }
                        (SheetFormat::Image, Err(e)) => CaptureEvent::SheetFailed {
                            session,
                            error: e.to_string(),
                        },
                        (SheetFormat::Document, Ok(document)) => {
                            CaptureEvent::DocumentComposed { session, document }
                        }
                        (SheetFormat::Document, Err(e)) => CaptureEvent::DocumentFailed {
                            session,
                            error: e.to_string(),
                        },
                    };
                    tx.event(event);
                });
            }

            CaptureCommand::SaveArtifact { artifact } => {
                let tx = self.message_tx.clone();
                let dir = self.settings.output_dir.clone();
                let path = self.artifact_path(artifact.format);
                let size = artifact.bytes.len();

                tokio::spawn(async move {
                    match write_artifact(dir, path.clone(), artifact.bytes).await {
                        Ok(()) => log::info!(
                            "Saved {} ({} bytes) to {}",
                            artifact.content_type,
                            size,
                            path.display()
                        ),
                        Err(error) => {
                            log::error!("Failed to save {}: {}", path.display(), error);
                            tx.event(CaptureEvent::ArtifactSaveFailed {
                                path: path.display().to_string(),
                                error,
                            });
                        }
                    }
                });
            }

            CaptureCommand::PrintSheet { session, sheet } => {
                let tx = self.message_tx.clone();
                let Some(program) = self.settings.print_command.clone() else {
                    tx.event(CaptureEvent::PrintFinished {
                        result: Err("No print command configured".into()),
                    });
                    return;
                };
                let dir = self.settings.output_dir.clone();
                let path = dir.join(format!("print_{}_{}", session, sheet.format.file_name()));

                tokio::spawn(async move {
                    let result = match write_artifact(dir, path.clone(), sheet.bytes).await {
                        Ok(()) => print_file(&program, &path).await,
                        Err(e) => Err(format!("Could not write print job: {}", e)),
                    };
                    tx.event(CaptureEvent::PrintFinished { result });
                });
            }

            CaptureCommand::Notify(notice) => match notice.kind {
                NoticeKind::Info | NoticeKind::Success => log::info!("[notice] {}", notice.message),
                NoticeKind::Error => log::warn!("[notice] {}", notice.message),
            },

            CaptureCommand::Telemetry(event) => {
                let api = self.api.clone();
                tokio::spawn(async move { api.log_event(&event).await });
            }

            CaptureCommand::UpdateUI => {
                let sm = &self.state_machine;
                log::debug!(
                    "State {:?} (pre_capture={}, retry={}, approve={}, stable={}, verdict={:?})",
                    sm.state,
                    sm.is_pre_capture(),
                    sm.retry_available(),
                    sm.can_approve(),
                    sm.stable_frames(),
                    sm.last_verdict
                );
            }
        }
    }

    fn artifact_path(&self, format: SheetFormat) -> PathBuf {
        self.settings.output_dir.join(format.file_name())
    }

    /// Capability probe: warn when the backend has no image credential
    fn probe_server(&self) {
        let api = self.api.clone();
        tokio::spawn(async move {
            match api.server_info().await {
                Ok(info) if !info.key_present => {
                    log::warn!("Image API key missing on server; stylization will fail")
                }
                Ok(info) => log::info!(
                    "Backend ready (model={:?}, size={:?}, quality={:?})",
                    info.model,
                    info.size,
                    info.quality
                ),
                Err(e) => log::warn!("Backend info unavailable: {}", e),
            }
        });
    }
}

/// Write `bytes` to `path` off the dispatch thread, creating `dir` first
async fn write_artifact(dir: PathBuf, path: PathBuf, bytes: Vec<u8>) -> Result<(), String> {
    let written = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&path, &bytes)
    })
    .await;

    match written {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("Writer task failed: {}", e)),
    }
}

/// Run the print command with `path` as its last argument
async fn print_file(program: &str, path: &Path) -> Result<(), String> {
    log::info!("Printing {} with {}", path.display(), program);
    match tokio::process::Command::new(program).arg(path).status().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("{} exited with {}", program, status)),
        Err(e) => Err(format!("{}: {}", program, e)),
    }
}

/// Map one line of operator input to a message
pub fn parse_operator_line(line: &str, settings: &KioskSettings) -> Option<AppMessage> {
    let mut words = line.split_whitespace();
    let command = words.next()?.to_ascii_lowercase();
    let arg = words.next().map(str::to_ascii_lowercase);

    let event = match (command.as_str(), arg.as_deref()) {
        ("capture", _) => CaptureEvent::TriggerCapture,
        ("retry", _) => CaptureEvent::Retry,
        ("retake", _) => CaptureEvent::Retake,
        ("reset", _) => CaptureEvent::Reset,
        ("approve", _) => CaptureEvent::Approve {
            options: settings.layout.clone(),
        },
        ("back", _) => CaptureEvent::BackToEdit,
        ("print", _) => CaptureEvent::Print,
        ("pdf", _) => CaptureEvent::ExportDocument {
            options: settings.layout.clone(),
        },
        ("mode", Some("manual")) => CaptureEvent::SetMode(TriggerMode::Manual),
        ("mode", Some("auto")) => CaptureEvent::SetMode(TriggerMode::Auto),
        ("autoface", Some("on")) => CaptureEvent::SetAutoFace(true),
        ("autoface", Some("off")) => CaptureEvent::SetAutoFace(false),
        ("quit", _) => return Some(AppMessage::Quit),
        _ => return None,
    };
    Some(AppMessage::Event(event))
}

/// Read operator commands from stdin until it closes
fn spawn_operator_input(tx: MessageSender, settings: KioskSettings) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_operator_line(&line, &settings) {
                    Some(msg) => tx.send(msg),
                    None if line.trim().is_empty() => {}
                    None => log::warn!("Unknown operator command: {}", line.trim()),
                },
                Ok(None) => {
                    log::info!("Operator input closed");
                    break;
                }
                Err(e) => {
                    log::error!("Operator input error: {}", e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Shape;
    use crate::api::SheetArtifact;
    use url::Url;

    fn context(
        output_dir: &Path,
        print_command: Option<&str>,
    ) -> (AppContext, mpsc::UnboundedReceiver<AppMessage>) {
        let mut settings = KioskSettings::default();
        settings.output_dir = output_dir.to_path_buf();
        settings.print_command = print_command.map(str::to_string);
        let api = ApiClient::new(Url::parse("http://127.0.0.1:9").unwrap());
        AppContext::new(settings, api, None)
    }

    fn sheet(bytes: &[u8]) -> SheetArtifact {
        SheetArtifact {
            format: SheetFormat::Image,
            content_type: "image/png".into(),
            bytes: bytes.to_vec(),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<AppMessage>) -> CaptureEvent {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no message within 5s");
        match msg {
            Some(AppMessage::Event(event)) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_save_artifact_writes_output_dir() {
        let temp = tempfile::tempdir().unwrap();
        let output = temp.path().join("output");
        let (mut ctx, _rx) = context(&output, None);

        ctx.execute_command(CaptureCommand::SaveArtifact {
            artifact: sheet(&[1, 2, 3]),
        });

        let path = output.join(config::SHEET_FILE_NAME);
        for _ in 0..500 {
            if std::fs::read(&path).ok().as_deref() == Some(&[1u8, 2, 3][..]) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sheet never written to {}", path.display());
    }

    #[tokio::test]
    async fn test_save_failure_reaches_state_machine() {
        let temp = tempfile::tempdir().unwrap();
        // A plain file where the output directory should be
        let blocker = temp.path().join("output");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let (mut ctx, mut rx) = context(&blocker, None);

        ctx.execute_command(CaptureCommand::SaveArtifact {
            artifact: sheet(&[1, 2, 3]),
        });

        match next_event(&mut rx).await {
            CaptureEvent::ArtifactSaveFailed { path, .. } => {
                assert!(path.ends_with(config::SHEET_FILE_NAME))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_print_uses_session_sheet() {
        let temp = tempfile::tempdir().unwrap();
        // A stale sheet from an earlier guest must not be what gets printed
        std::fs::write(temp.path().join(config::SHEET_FILE_NAME), b"old").unwrap();
        let (mut ctx, mut rx) = context(temp.path(), Some("true"));

        ctx.execute_command(CaptureCommand::PrintSheet {
            session: 7,
            sheet: sheet(&[4, 5, 6]),
        });

        match next_event(&mut rx).await {
            CaptureEvent::PrintFinished { result } => assert_eq!(result, Ok(())),
            other => panic!("unexpected {:?}", other),
        }
        let job = temp
            .path()
            .join(format!("print_7_{}", config::SHEET_FILE_NAME));
        assert_eq!(std::fs::read(job).unwrap(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn test_print_command_failure() {
        let temp = tempfile::tempdir().unwrap();
        let (mut ctx, mut rx) = context(temp.path(), Some("false"));

        ctx.execute_command(CaptureCommand::PrintSheet {
            session: 1,
            sheet: sheet(&[1]),
        });

        match next_event(&mut rx).await {
            CaptureEvent::PrintFinished { result } => {
                assert!(result.unwrap_err().starts_with("false exited with"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_print_without_command() {
        let temp = tempfile::tempdir().unwrap();
        let (mut ctx, mut rx) = context(temp.path(), None);

        ctx.execute_command(CaptureCommand::PrintSheet {
            session: 1,
            sheet: sheet(&[1]),
        });

        match next_event(&mut rx).await {
            CaptureEvent::PrintFinished { result } => {
                assert_eq!(result, Err("No print command configured".to_string()))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_operator_commands() {
        let mut settings = KioskSettings::default();
        settings.layout.shape = Shape::Square;

        assert!(matches!(
            parse_operator_line("capture", &settings),
            Some(AppMessage::Event(CaptureEvent::TriggerCapture))
        ));
        assert!(matches!(
            parse_operator_line("  Mode MANUAL ", &settings),
            Some(AppMessage::Event(CaptureEvent::SetMode(TriggerMode::Manual)))
        ));
        assert!(matches!(
            parse_operator_line("autoface off", &settings),
            Some(AppMessage::Event(CaptureEvent::SetAutoFace(false)))
        ));
        match parse_operator_line("approve", &settings) {
            Some(AppMessage::Event(CaptureEvent::Approve { options })) => {
                assert_eq!(options.shape, Shape::Square)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse_operator_line("quit", &settings),
            Some(AppMessage::Quit)
        ));
        assert!(parse_operator_line("mode sideways", &settings).is_none());
        assert!(parse_operator_line("", &settings).is_none());
    }
}
