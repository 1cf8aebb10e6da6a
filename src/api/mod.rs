//! Clients for the booth backend (stylization, sheets, telemetry).

pub mod http;
pub mod models;

pub use http::ApiClient;
pub use models::{
    LogEvent, LogLevel, QualityReason, SheetArtifact, SheetFormat, SheetOptions, StylizeOutcome,
};
