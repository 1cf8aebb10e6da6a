//! Request and response payloads for the booth backend.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/cartoonize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StylizeRequest<'a> {
    pub image_data: &'a str,
    pub quality_gate: bool,
    pub force_fresh: bool,
}

impl<'a> StylizeRequest<'a> {
    /// The quality gate is always requested; attempts after the first bypass cached results.
    pub fn new(image_data: &'a str, attempt: u32) -> Self {
        Self {
            image_data,
            quality_gate: true,
            force_fresh: attempt > 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StylizeResponse {
    pub cartoon_data: String,
    #[serde(default)]
    pub fallback: bool,
}

/// Why the backend's quality gate refused a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityReason {
    Blurry,
    Dark,
    Other(String),
}

impl QualityReason {
    pub fn as_str(&self) -> &str {
        match self {
            QualityReason::Blurry => "blurry",
            QualityReason::Dark => "dark",
            QualityReason::Other(reason) => reason,
        }
    }

    /// Retake prompt shown to the guest
    pub fn prompt(&self) -> &'static str {
        match self {
            QualityReason::Blurry => "Photo looks blurry. Please retake.",
            QualityReason::Dark => "Photo is too dark. Improve lighting and retake.",
            QualityReason::Other(_) => "Photo quality is low. Please retake.",
        }
    }
}

impl From<Option<String>> for QualityReason {
    fn from(reason: Option<String>) -> Self {
        match reason.as_deref() {
            Some("blurry") => QualityReason::Blurry,
            Some("dark") => QualityReason::Dark,
            Some(other) => QualityReason::Other(other.to_string()),
            None => QualityReason::Other("unknown".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct QualityMetrics {
    #[serde(default)]
    pub blur: f64,
    #[serde(default)]
    pub brightness: f64,
}

/// 422 body returned by the quality gate.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RejectionBody {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metrics: Option<QualityMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of a stylization call that reached the backend and was understood.
#[derive(Debug, Clone, PartialEq)]
pub enum StylizeOutcome {
    Stylized {
        /// PNG data URI
        image: String,
        /// The backend used its degraded stylizer
        fallback: bool,
    },
    Rejected {
        reason: QualityReason,
        metrics: Option<QualityMetrics>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Circle,
    Square,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Border {
    #[default]
    None,
    Thin,
    Medium,
    Thick,
    Dotted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    None,
    Gold,
    Neon,
    Brand,
}

/// Sticker-sheet layout chosen at approval time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetOptions {
    pub shape: Shape,
    pub border: Border,
    pub theme: Theme,
    pub branding: bool,
    pub brand_text: String,
    pub brand_color: String,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            shape: Shape::Circle,
            border: Border::None,
            theme: Theme::None,
            branding: false,
            brand_text: String::new(),
            brand_color: "#FF4081".to_string(),
        }
    }
}

/// Body of the sheet endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRequest<'a> {
    pub image_data: &'a str,
    pub options: &'a SheetOptions,
}

/// Which sheet endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// On-screen PNG sheet
    Image,
    /// Downloadable A4 PDF
    Document,
}

impl SheetFormat {
    pub fn default_error(&self) -> &'static str {
        match self {
            SheetFormat::Image => "Failed to generate A4 sheet",
            SheetFormat::Document => "Failed to create PDF",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            SheetFormat::Image => crate::config::SHEET_FILE_NAME,
            SheetFormat::Document => crate::config::DOCUMENT_FILE_NAME,
        }
    }
}

/// A composed sheet returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetArtifact {
    pub format: SheetFormat,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// `GET /api/info` capability report.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub key_present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Telemetry event posted to `POST /api/log`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub meta: serde_json::Value,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>, meta: serde_json::Value) -> Self {
        Self {
            level,
            message: message.into(),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stylize_request_wire_format() {
        let first = serde_json::to_value(StylizeRequest::new("data:image/png;base64,AA", 1)).unwrap();
        assert_eq!(
            first,
            json!({"imageData": "data:image/png;base64,AA", "qualityGate": true, "forceFresh": false})
        );

        let retry = serde_json::to_value(StylizeRequest::new("x", 2)).unwrap();
        assert_eq!(retry["forceFresh"], json!(true));
        assert_eq!(retry["qualityGate"], json!(true));
    }

    #[test]
    fn test_sheet_options_wire_format() {
        let options = SheetOptions {
            shape: Shape::Square,
            border: Border::Dotted,
            theme: Theme::Neon,
            branding: true,
            brand_text: "Hello".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(SheetRequest {
            image_data: "img",
            options: &options,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "imageData": "img",
                "options": {
                    "shape": "square",
                    "border": "dotted",
                    "theme": "neon",
                    "branding": true,
                    "brand_text": "Hello",
                    "brand_color": "#FF4081"
                }
            })
        );
    }

    #[test]
    fn test_quality_reason_mapping() {
        assert_eq!(QualityReason::from(Some("blurry".to_string())), QualityReason::Blurry);
        assert_eq!(QualityReason::from(Some("dark".to_string())), QualityReason::Dark);
        let other = QualityReason::from(Some("decode_failed".to_string()));
        assert_eq!(other.as_str(), "decode_failed");
        assert_eq!(other.prompt(), "Photo quality is low. Please retake.");
    }
}
