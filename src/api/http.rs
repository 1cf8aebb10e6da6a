//! HTTP API client for the booth backend.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use thiserror::Error;
use url::Url;

use super::models::{
    ErrorBody, LogEvent, RejectionBody, ServerInfo, SheetArtifact, SheetFormat, SheetOptions,
    SheetRequest, StylizeOutcome, StylizeRequest, StylizeResponse,
};
use crate::config;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("{0}")]
    Server(String),
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    fn from_send(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Request(e)
        }
    }
}

/// Per-endpoint request timeouts
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub stylize: Duration,
    pub sheet: Duration,
    pub info: Duration,
    pub log: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stylize: config::STYLIZE_TIMEOUT,
            sheet: config::SHEET_TIMEOUT,
            info: config::INFO_TIMEOUT,
            log: config::LOG_TIMEOUT,
        }
    }
}

/// HTTP client for the booth API
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    timeouts: Timeouts,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self::with_timeouts(base, Timeouts::default())
    }

    pub fn with_timeouts(base: Url, timeouts: Timeouts) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            timeouts,
        }
    }

    /// Send a capture for stylization.
    ///
    /// A 422 from the quality gate is not an error: it comes back as
    /// [`StylizeOutcome::Rejected`]. Attempts after the first set `forceFresh`.
    pub async fn stylize(&self, image: &str, attempt: u32) -> Result<StylizeOutcome, ApiError> {
        let url = config::cartoonize_url(&self.base)?;
        let body = StylizeRequest::new(image, attempt);
        log::info!(
            "Requesting stylization at {} (attempt {}, force_fresh={})",
            url,
            attempt,
            body.force_fresh
        );

        let response = self
            .client
            .post(url)
            .timeout(self.timeouts.stylize)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_send)?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.map_err(ApiError::from_send)?;
            let rejection: RejectionBody = serde_json::from_str(&text).unwrap_or_default();
            log::warn!("Quality gate rejected capture: {:?}", rejection.reason);
            return Ok(StylizeOutcome::Rejected {
                reason: rejection.reason.into(),
                metrics: rejection.metrics,
            });
        }

        if !status.is_success() {
            return Err(error_from(response, format!("HTTP {}", status.as_u16())).await);
        }

        let parsed: StylizeResponse = response.json().await.map_err(ApiError::from_send)?;
        log::info!("Stylization complete (fallback={})", parsed.fallback);
        Ok(StylizeOutcome::Stylized {
            image: parsed.cartoon_data,
            fallback: parsed.fallback,
        })
    }

    /// Compose a print sheet from an approved stylized image
    pub async fn compose_sheet(
        &self,
        image: &str,
        options: &SheetOptions,
        format: SheetFormat,
    ) -> Result<SheetArtifact, ApiError> {
        let url = match format {
            SheetFormat::Image => config::print_sheet_url(&self.base)?,
            SheetFormat::Document => config::print_sheet_pdf_url(&self.base)?,
        };
        log::info!("Composing {:?} sheet at {}", format, url);

        let response = self
            .client
            .post(url)
            .timeout(self.timeouts.sheet)
            .json(&SheetRequest {
                image_data: image,
                options,
            })
            .send()
            .await
            .map_err(ApiError::from_send)?;

        if !response.status().is_success() {
            return Err(error_from(response, format.default_error().to_string()).await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| match format {
                SheetFormat::Image => "image/png".to_string(),
                SheetFormat::Document => "application/pdf".to_string(),
            });
        let bytes = response.bytes().await.map_err(ApiError::from_send)?;
        log::info!("Received {} sheet ({} bytes)", content_type, bytes.len());

        Ok(SheetArtifact {
            format,
            content_type,
            bytes: bytes.to_vec(),
        })
    }

    /// Probe backend capabilities (model settings, credential presence)
    pub async fn server_info(&self) -> Result<ServerInfo, ApiError> {
        let url = config::info_url(&self.base)?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeouts.info)
            .send()
            .await
            .map_err(ApiError::from_send)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(error_from(response, format!("HTTP {}", status.as_u16())).await);
        }

        response.json().await.map_err(ApiError::from_send)
    }

    /// Post a telemetry event. Failures are logged and dropped.
    pub async fn log_event(&self, event: &LogEvent) {
        let url = match config::log_url(&self.base) {
            Ok(url) => url,
            Err(e) => {
                log::debug!("Telemetry URL invalid: {}", e);
                return;
            }
        };

        let result = self
            .client
            .post(url)
            .timeout(self.timeouts.log)
            .json(event)
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                log::debug!("Telemetry rejected: {}", response.status());
            }
            Ok(_) => {}
            Err(e) => log::debug!("Telemetry dropped: {}", e),
        }
    }
}

/// Turn a non-success response into an error, preferring the body's `error` field.
async fn error_from(response: Response, fallback: String) -> ApiError {
    let body = response.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    ApiError::Server(parsed.error.unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{LogLevel, QualityReason};
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(Url::parse(&server.uri()).unwrap())
    }

    #[tokio::test]
    async fn test_stylize_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cartoonize"))
            .and(body_json(json!({
                "imageData": "data:image/png;base64,AAAA",
                "qualityGate": true,
                "forceFresh": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cartoonData": "data:image/png;base64,BBBB",
                "fallback": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client_for(&server)
            .stylize("data:image/png;base64,AAAA", 1)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StylizeOutcome::Stylized {
                image: "data:image/png;base64,BBBB".into(),
                fallback: false
            }
        );
    }

    #[tokio::test]
    async fn test_stylize_quality_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cartoonize"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": "low_quality",
                "reason": "dark",
                "metrics": {"blur": 150.2, "brightness": 31.0},
                "action": "retake"
            })))
            .mount(&server)
            .await;

        let outcome = client_for(&server).stylize("img", 1).await.unwrap();
        match outcome {
            StylizeOutcome::Rejected { reason, metrics } => {
                assert_eq!(reason, QualityReason::Dark);
                assert_eq!(metrics.unwrap().brightness, 31.0);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stylize_server_error_uses_body_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cartoonize"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"error": "upstream exploded"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).stylize("img", 1).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream exploded");
    }

    #[tokio::test]
    async fn test_timeout_then_forced_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cartoonize"))
            .and(body_partial_json(json!({"forceFresh": false})))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/cartoonize"))
            .and(body_partial_json(json!({"forceFresh": true, "qualityGate": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cartoonData": "data:image/png;base64,FRESH"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::with_timeouts(
            Url::parse(&server.uri()).unwrap(),
            Timeouts {
                stylize: Duration::from_millis(100),
                ..Timeouts::default()
            },
        );

        let err = client.stylize("img", 1).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout));

        let outcome = client.stylize("img", 2).await.unwrap();
        assert!(matches!(outcome, StylizeOutcome::Stylized { fallback: false, .. }));
    }

    #[tokio::test]
    async fn test_compose_sheet_variants() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/print-sheet"))
            .and(body_partial_json(json!({"imageData": "img", "options": {"shape": "circle"}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/print-sheet-pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4".to_vec()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let options = SheetOptions::default();

        let sheet = client
            .compose_sheet("img", &options, SheetFormat::Image)
            .await
            .unwrap();
        assert_eq!(sheet.content_type, "image/png");
        assert_eq!(sheet.bytes, vec![0x89, b'P', b'N', b'G']);

        let pdf = client
            .compose_sheet("img", &options, SheetFormat::Document)
            .await
            .unwrap();
        assert_eq!(pdf.format, SheetFormat::Document);
        assert!(pdf.bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_compose_sheet_error_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/print-sheet-pdf"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .compose_sheet("img", &SheetOptions::default(), SheetFormat::Document)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to create PDF");
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-image-1",
                "size": "1536x1536",
                "quality": "high",
                "key_present": false
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).server_info().await.unwrap();
        assert!(!info.key_present);
        assert_eq!(info.model.as_deref(), Some("gpt-image-1"));
    }

    #[tokio::test]
    async fn test_log_event_posts_and_ignores_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/log"))
            .and(body_json(json!({
                "level": "error",
                "message": "cartoonize_failed",
                "meta": {"message": "boom"}
            })))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .log_event(&LogEvent::new(
                LogLevel::Error,
                "cartoonize_failed",
                json!({"message": "boom"}),
            ))
            .await;
    }
}
