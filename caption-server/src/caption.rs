use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::upload::InlineImage;

pub mod handler;
pub mod parser;

pub use handler::generate_caption;

/// Upper bound on the number of captions requested from the model.
pub const MAX_CAPTIONS: i64 = 20;

/// Validated caption request, alive for the duration of one HTTP call.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub image: InlineImage,
    /// Trimmed, lower-cased style tag.
    pub category: String,
    /// Requested count, clamped to [`MAX_CAPTIONS`].
    pub num_captions: i64,
    /// Normalized language tag as sent by the client.
    pub language: String,
    /// Normalized length tag as sent by the client.
    pub length: String,
}

impl CaptionRequest {
    /// Number of records to keep from the parsed model output.
    pub fn max_records(&self) -> usize {
        usize::try_from(self.num_captions).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Gujarati,
}

impl Language {
    /// Unrecognized tags fall back to English.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "hindi" => Self::Hindi,
            "gujarati" => Self::Gujarati,
            _ => Self::English,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Self::English => "in English",
            Self::Hindi => "in Hindi",
            Self::Gujarati => "in Gujarati",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Length {
    Short,
    #[default]
    Medium,
    Long,
}

impl Length {
    /// Unrecognized tags fall back to medium.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "short" => Self::Short,
            "long" => Self::Long,
            _ => Self::Medium,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Short => "1 sentence long",
            Self::Medium => "2–3 sentences long",
            Self::Long => "3–5 sentences long and storytelling style",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionRecord {
    pub caption: String,
    pub hashtags: String,
}

#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub category: String,
    pub language: String,
    pub captions: Vec<CaptionRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("No image uploaded")]
    MissingImage,
    #[error("No caption category provided")]
    MissingCategory,
    #[error("No caption count provided")]
    MissingCount,
    #[error("Invalid caption count: {0}")]
    InvalidCount(String),
    /// Malformed or oversized multipart body, with the status reported by the extractor.
    #[error("{1}")]
    InvalidForm(StatusCode, String),
    #[error("No captions generated")]
    NoCaptions,
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl CaptionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingImage
            | Self::MissingCategory
            | Self::MissingCount
            | Self::InvalidCount(_) => StatusCode::BAD_REQUEST,
            Self::InvalidForm(status, _) => *status,
            Self::NoCaptions | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CaptionError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Caption generation failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
