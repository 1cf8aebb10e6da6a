//! Capture state machine and business logic.
//!
//! This module contains no I/O. Events come in through
//! [`CaptureStateMachine::process`], which returns commands for the app layer
//! to execute (network calls, timers, file output). Results are fed back in
//! as events, so the whole flow can be tested without a camera or a backend.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{LogEvent, LogLevel, QualityReason, SheetArtifact, SheetFormat, SheetOptions};
use crate::config::{self, KioskSettings};
use crate::face::{FaceBox, FrameVerdict, Size, StabilityTracker};

/// How a countdown gets started from the armed state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Operator presses the capture button
    Manual,
    /// A stable, centred face starts the countdown (the button still works)
    #[default]
    Auto,
}

/// Stylization progress while the preview is shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    Converting { attempt: u32 },
    /// Transient failure; the guest may retry
    Failed { attempt: u32, error: String },
}

/// Capture flow states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    /// No live camera yet
    Idle,
    /// Waiting for a trigger
    Arming(TriggerMode),
    CountingDown { remaining: u32 },
    /// Countdown finished, waiting for the still frame
    Captured,
    Previewing(Conversion),
    ReadyForApproval,
    /// Sheet composition in flight
    Approved,
    SheetReady,
}

/// The one active capture: original still, stylized result, composed sheet.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    pub id: u64,
    pub original: Option<String>,
    pub stylized: Option<String>,
    pub sheet: Option<SheetArtifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// Short message for the guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    // Device
    CameraReady,
    CameraFailed { error: String },

    // Settings
    SetMode(TriggerMode),
    SetAutoFace(bool),

    // User actions
    TriggerCapture,
    Retry,
    Retake,
    Reset,
    Approve { options: SheetOptions },
    BackToEdit,
    Print,
    ExportDocument { options: SheetOptions },

    // Detection loop: best candidate already scaled to overlay pixels
    DetectionTick { face: Option<FaceBox>, overlay: Size },

    // Timers and camera
    CountdownTick { countdown: u64 },
    StillCaptured { image: String },
    CaptureFailed { error: String },

    // Backend responses
    StylizeSucceeded { session: u64, image: String, fallback: bool },
    StylizeRejected { session: u64, reason: QualityReason },
    StylizeFailed { session: u64, error: String },
    SheetComposed { session: u64, sheet: SheetArtifact },
    SheetFailed { session: u64, error: String },
    DocumentComposed { session: u64, document: SheetArtifact },
    DocumentFailed { session: u64, error: String },
    PrintFinished { result: Result<(), String> },

    // Output directory
    ArtifactSaveFailed { path: String, error: String },
}

/// Commands emitted by the state machine for the app layer to execute
#[derive(Debug, Clone)]
pub enum CaptureCommand {
    /// Schedule `seconds` one-second ticks tagged with `countdown`
    StartCountdown { countdown: u64, seconds: u32 },
    /// Play a countdown beep
    Cue { frequency_hz: u32 },
    /// Grab a still frame from the camera
    CaptureStill,
    Stylize { session: u64, image: String, attempt: u32 },
    ComposeSheet {
        session: u64,
        image: String,
        options: SheetOptions,
        format: SheetFormat,
    },
    /// Write a composed sheet or document to the output directory
    SaveArtifact { artifact: SheetArtifact },
    /// Send the session's composed sheet to the printer
    PrintSheet { session: u64, sheet: SheetArtifact },
    Notify(Notice),
    Telemetry(LogEvent),
    /// State changed; refresh whatever front end is attached
    UpdateUI,
}

/// The capture state machine
#[derive(Debug)]
pub struct CaptureStateMachine {
    pub state: CaptureState,
    pub mode: TriggerMode,
    pub auto_face: bool,
    pub session: Option<CaptureSession>,
    /// Verdict of the last evaluated frame, for drawing the overlay
    pub last_verdict: Option<FrameVerdict>,
    pub error: Option<String>,
    countdown_seconds: u32,
    countdown_sound: bool,
    detector_available: bool,
    camera_live: bool,
    tracker: StabilityTracker,
    countdown_id: u64,
    next_session_id: u64,
    /// Backend requests issued and not yet answered
    in_flight: u32,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new(TriggerMode::Auto, config::COUNTDOWN_DEFAULT_SECS)
    }
}

impl CaptureStateMachine {
    pub fn new(mode: TriggerMode, countdown_seconds: u32) -> Self {
        Self {
            state: CaptureState::Idle,
            mode,
            auto_face: true,
            session: None,
            last_verdict: None,
            error: None,
            countdown_seconds: config::clamp_countdown(countdown_seconds),
            countdown_sound: true,
            detector_available: false,
            camera_live: false,
            tracker: StabilityTracker::default(),
            countdown_id: 0,
            next_session_id: 0,
            in_flight: 0,
        }
    }

    pub fn from_settings(settings: &KioskSettings, detector_available: bool) -> Self {
        let mut machine = Self::new(settings.trigger_mode, settings.countdown_seconds())
            .with_detector(detector_available);
        machine.auto_face = settings.auto_face;
        machine.countdown_sound = settings.countdown_sound;
        machine
    }

    pub fn with_detector(mut self, available: bool) -> Self {
        self.detector_available = available;
        self
    }

    /// Whether auto-face capture can work at all on this kiosk
    pub fn auto_face_available(&self) -> bool {
        self.detector_available
    }

    /// Whether the detection loop should evaluate frames right now
    pub fn tracking_active(&self) -> bool {
        self.detector_available
            && self.auto_face
            && self.state == CaptureState::Arming(TriggerMode::Auto)
            && self.in_flight == 0
    }

    pub fn is_pre_capture(&self) -> bool {
        matches!(self.state, CaptureState::Idle | CaptureState::Arming(_))
    }

    pub fn retry_available(&self) -> bool {
        matches!(self.state, CaptureState::Previewing(Conversion::Failed { .. }))
    }

    pub fn stylized_image(&self) -> Option<&str> {
        self.session.as_ref()?.stylized.as_deref()
    }

    pub fn can_approve(&self) -> bool {
        self.state == CaptureState::ReadyForApproval && self.stylized_image().is_some()
    }

    pub fn stable_frames(&self) -> u32 {
        self.tracker.stable_frames()
    }

    /// Process an event and return commands to execute
    pub fn process(&mut self, event: CaptureEvent) -> Vec<CaptureCommand> {
        let mut commands = Vec::new();

        match event {
            CaptureEvent::CameraReady => {
                self.camera_live = true;
                self.error = None;
                if self.state == CaptureState::Idle {
                    self.arm();
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::CameraFailed { error } => {
                self.camera_live = false;
                log::error!("Camera failure: {}", error);
                if matches!(
                    self.state,
                    CaptureState::Arming(_) | CaptureState::CountingDown { .. } | CaptureState::Captured
                ) {
                    self.state = CaptureState::Idle;
                    self.tracker.reset();
                }
                self.error = Some(format!("Camera unavailable: {}", error));
                commands.push(CaptureCommand::Notify(Notice::error(format!(
                    "Camera unavailable: {}",
                    error
                ))));
                commands.push(telemetry(LogLevel::Error, "camera_failed", json!({ "message": error })));
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::SetMode(mode) => {
                self.mode = mode;
                self.tracker.reset();
                if let CaptureState::Arming(_) = self.state {
                    self.state = CaptureState::Arming(mode);
                }
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::SetAutoFace(enabled) => {
                if enabled && !self.detector_available {
                    log::warn!("Auto-face requested but no face detector is available");
                }
                self.auto_face = enabled;
                self.tracker.reset();
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::TriggerCapture => {
                if self.can_trigger() {
                    self.start_countdown(&mut commands);
                } else {
                    log::debug!("Ignoring capture trigger in {:?}", self.state);
                }
            }

            CaptureEvent::DetectionTick { face, overlay } => {
                if !self.tracking_active() {
                    self.tracker.reset();
                    self.last_verdict = None;
                    return commands;
                }

                let verdict = FrameVerdict::judge(face, overlay);
                self.last_verdict = Some(verdict);
                if self.tracker.observe(&verdict) {
                    log::info!("Face stable for {} frames, starting countdown", config::STABLE_FRAMES);
                    self.start_countdown(&mut commands);
                }
            }

            CaptureEvent::CountdownTick { countdown } => {
                let CaptureState::CountingDown { remaining } = self.state else {
                    return commands;
                };
                if countdown != self.countdown_id {
                    log::debug!("Dropping tick from stale countdown {}", countdown);
                    return commands;
                }

                let remaining = remaining.saturating_sub(1);
                if self.countdown_sound {
                    commands.push(CaptureCommand::Cue {
                        frequency_hz: config::cue_frequency(self.countdown_seconds, remaining),
                    });
                }
                if remaining == 0 {
                    self.state = CaptureState::Captured;
                    commands.push(CaptureCommand::CaptureStill);
                } else {
                    self.state = CaptureState::CountingDown { remaining };
                }
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::StillCaptured { image } => {
                if self.state != CaptureState::Captured {
                    return commands;
                }
                self.next_session_id += 1;
                self.session = Some(CaptureSession {
                    id: self.next_session_id,
                    original: Some(image),
                    stylized: None,
                    sheet: None,
                });
                self.error = None;
                self.begin_conversion(1, &mut commands);
            }

            CaptureEvent::CaptureFailed { error } => {
                if self.state != CaptureState::Captured {
                    return commands;
                }
                self.arm();
                self.error = Some(error.clone());
                commands.push(CaptureCommand::Notify(Notice::error(format!(
                    "Capture failed: {}",
                    error
                ))));
                commands.push(telemetry(LogLevel::Error, "capture_failed", json!({ "message": error })));
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::StylizeSucceeded {
                session,
                image,
                fallback,
            } => {
                self.request_done();
                if !self.is_converting(session) {
                    return commands;
                }
                if let Some(ref mut current) = self.session {
                    current.stylized = Some(image);
                }
                self.state = CaptureState::ReadyForApproval;
                if fallback {
                    commands.push(CaptureCommand::Notify(Notice::error(
                        "Used a simpler cartoon style this time.",
                    )));
                    commands.push(telemetry(LogLevel::Warn, "fallback_stylize_used", json!({})));
                } else {
                    commands.push(CaptureCommand::Notify(Notice::success(
                        "Cartoon ready! Approve to print.",
                    )));
                }
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::StylizeRejected { session, reason } => {
                self.request_done();
                if !self.is_converting(session) {
                    return commands;
                }
                self.session = None;
                self.error = Some(reason.prompt().to_string());
                self.arm();
                commands.push(CaptureCommand::Notify(Notice::error(reason.prompt())));
                commands.push(telemetry(
                    LogLevel::Warn,
                    "quality_rejected",
                    json!({ "reason": reason.as_str() }),
                ));
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::StylizeFailed { session, error } => {
                self.request_done();
                if !self.is_converting(session) {
                    return commands;
                }
                let CaptureState::Previewing(Conversion::Converting { attempt }) = self.state else {
                    return commands;
                };
                self.state = CaptureState::Previewing(Conversion::Failed {
                    attempt,
                    error: error.clone(),
                });
                self.error = Some(error.clone());
                commands.push(CaptureCommand::Notify(Notice::error(format!(
                    "Conversion failed: {}",
                    error
                ))));
                commands.push(telemetry(
                    LogLevel::Error,
                    "cartoonize_failed",
                    json!({ "message": error, "attempt": attempt }),
                ));
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::Retry => {
                if let CaptureState::Previewing(Conversion::Failed { attempt, .. }) = self.state {
                    self.error = None;
                    commands.push(CaptureCommand::Notify(Notice::info(format!(
                        "Retrying... (attempt {})",
                        attempt + 1
                    ))));
                    self.begin_conversion(attempt + 1, &mut commands);
                }
            }

            CaptureEvent::Approve { options } => {
                let Some((session, image)) = self.current_stylized() else {
                    commands.push(CaptureCommand::Notify(Notice::error(
                        "Please wait for the cartoon",
                    )));
                    return commands;
                };
                if self.state != CaptureState::ReadyForApproval {
                    return commands;
                }
                if self.in_flight > 0 {
                    log::debug!("Approval ignored: a backend request is still pending");
                    return commands;
                }
                self.state = CaptureState::Approved;
                self.in_flight += 1;
                commands.push(CaptureCommand::ComposeSheet {
                    session,
                    image,
                    options,
                    format: SheetFormat::Image,
                });
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::SheetComposed { session, sheet } => {
                self.request_done();
                if self.state != CaptureState::Approved || !self.is_current(session) {
                    return commands;
                }
                if let Some(ref mut current) = self.session {
                    current.sheet = Some(sheet.clone());
                }
                self.state = CaptureState::SheetReady;
                commands.push(CaptureCommand::SaveArtifact { artifact: sheet });
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::SheetFailed { session, error } => {
                self.request_done();
                if self.state != CaptureState::Approved || !self.is_current(session) {
                    return commands;
                }
                self.state = CaptureState::ReadyForApproval;
                self.error = Some(error.clone());
                commands.push(CaptureCommand::Notify(Notice::error(format!(
                    "Sheet generation error: {}",
                    error
                ))));
                commands.push(telemetry(LogLevel::Error, "sheet_failed", json!({ "message": error })));
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::BackToEdit => {
                if self.state == CaptureState::SheetReady {
                    self.state = CaptureState::ReadyForApproval;
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::Print => {
                if self.state != CaptureState::SheetReady {
                    return commands;
                }
                match self.session.as_ref().and_then(|s| Some((s.id, s.sheet.clone()?))) {
                    Some((session, sheet)) => {
                        commands.push(CaptureCommand::PrintSheet { session, sheet })
                    }
                    None => commands.push(CaptureCommand::Notify(Notice::error("No sheet to print."))),
                }
            }

            CaptureEvent::ArtifactSaveFailed { path, error } => {
                commands.push(CaptureCommand::Notify(Notice::error(format!(
                    "Could not save {}: {}",
                    path, error
                ))));
                commands.push(telemetry(
                    LogLevel::Error,
                    "save_failed",
                    json!({ "message": error, "path": path }),
                ));
            }

            CaptureEvent::PrintFinished { result } => match result {
                Ok(()) => commands.push(CaptureCommand::Notify(Notice::success("Sent to printer"))),
                Err(error) => {
                    commands.push(CaptureCommand::Notify(Notice::error(format!(
                        "Print error: {}",
                        error
                    ))));
                    commands.push(telemetry(LogLevel::Error, "print_failed", json!({ "message": error })));
                }
            },

            CaptureEvent::ExportDocument { options } => {
                let Some((session, image)) = self.current_stylized() else {
                    commands.push(CaptureCommand::Notify(Notice::error("No sheet to export.")));
                    return commands;
                };
                if self.in_flight > 0 {
                    log::debug!("Export ignored: a backend request is still pending");
                    return commands;
                }
                self.in_flight += 1;
                commands.push(CaptureCommand::ComposeSheet {
                    session,
                    image,
                    options,
                    format: SheetFormat::Document,
                });
            }

            CaptureEvent::DocumentComposed { session, document } => {
                self.request_done();
                if self.is_current(session) {
                    commands.push(CaptureCommand::SaveArtifact { artifact: document });
                }
            }

            CaptureEvent::DocumentFailed { session, error } => {
                self.request_done();
                if self.is_current(session) {
                    commands.push(CaptureCommand::Notify(Notice::error(format!(
                        "PDF error: {}",
                        error
                    ))));
                    commands.push(telemetry(LogLevel::Error, "pdf_failed", json!({ "message": error })));
                }
            }

            CaptureEvent::Retake => {
                self.clear_session();
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::Reset => {
                self.clear_session();
                commands.push(CaptureCommand::Notify(Notice::success("Session reset")));
                commands.push(CaptureCommand::UpdateUI);
            }
        }

        commands
    }

    /// Triggers are only honoured while armed with no backend request pending
    fn can_trigger(&self) -> bool {
        matches!(self.state, CaptureState::Arming(_)) && self.in_flight == 0
    }

    fn arm(&mut self) {
        self.tracker.reset();
        self.last_verdict = None;
        self.state = if self.camera_live {
            CaptureState::Arming(self.mode)
        } else {
            CaptureState::Idle
        };
    }

    fn start_countdown(&mut self, commands: &mut Vec<CaptureCommand>) {
        self.tracker.reset();
        self.last_verdict = None;
        self.countdown_id += 1;
        self.state = CaptureState::CountingDown {
            remaining: self.countdown_seconds,
        };
        commands.push(CaptureCommand::StartCountdown {
            countdown: self.countdown_id,
            seconds: self.countdown_seconds,
        });
        commands.push(CaptureCommand::UpdateUI);
    }

    fn begin_conversion(&mut self, attempt: u32, commands: &mut Vec<CaptureCommand>) {
        let Some((session, image)) = self
            .session
            .as_ref()
            .and_then(|s| s.original.clone().map(|image| (s.id, image)))
        else {
            return;
        };
        self.state = CaptureState::Previewing(Conversion::Converting { attempt });
        self.in_flight += 1;
        commands.push(CaptureCommand::Stylize {
            session,
            image,
            attempt,
        });
        commands.push(CaptureCommand::UpdateUI);
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.error = None;
        self.arm();
    }

    fn request_done(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    fn is_converting(&self, session: u64) -> bool {
        self.is_current(session)
            && matches!(self.state, CaptureState::Previewing(Conversion::Converting { .. }))
    }

    fn current_stylized(&self) -> Option<(u64, String)> {
        let session = self.session.as_ref()?;
        Some((session.id, session.stylized.clone()?))
    }
}

fn telemetry(level: LogLevel, message: &str, meta: serde_json::Value) -> CaptureCommand {
    CaptureCommand::Telemetry(LogEvent::new(level, message, meta))
}
