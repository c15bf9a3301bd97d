use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

/// Cache-Control applied to control-plane and error responses
pub const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Upstream request failed: {0}")]
    UpstreamFetch(#[from] reqwest::Error),

    #[error("Upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("Failed to decode upstream payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid or missing secret")]
    Unauthorized,

    #[error("{message}")]
    BadRequest {
        message: String,
        /// Accepted parameters, echoed back to the caller
        usage: Option<Value>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            usage: None,
        }
    }

    pub fn bad_request_with_usage(message: impl Into<String>, usage: Value) -> Self {
        Self::BadRequest {
            message: message.into(),
            usage: Some(usage),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamFetch(_) | Self::UpstreamStatus(_) | Self::Decode(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } | Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            Self::Unauthorized => json!({ "error": self.to_string() }),
            Self::BadRequest { message, usage } => match usage {
                Some(usage) => json!({ "error": message, "usage": usage }),
                None => json!({ "error": message }),
            },
            Self::NotFound(what) => json!({ "error": "Not found", "message": what }),
            Self::InvalidUrl(_) => json!({ "error": "Invalid URL", "message": self.to_string() }),
            Self::UpstreamFetch(_) | Self::UpstreamStatus(_) | Self::Decode(_) => {
                error!("{}", self);
                // Raw upstream text never reaches the caller
                json!({ "error": "Upstream unavailable" })
            }
            Self::Internal(message) => {
                error!("Internal error: {}", message);
                json!({ "error": "Internal Server Error", "message": message })
            }
        };

        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        response
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
