use std::time::Duration;

use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

use super::types::XrpcErrorBody;

/// Failure talking to the destination.
///
/// Rate limiting and authentication failures are distinct variants so the
/// engine can retry the former and abort on the latter.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("rate limited by destination (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("destination returned {status} {error}: {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether repeating the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Authentication(_) | Self::Decode(_) => false,
        }
    }

    /// Whether the destination refused the request without applying it, so
    /// a call that is not idempotent can be sent again.
    #[must_use]
    pub fn is_safe_to_replay(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether the run cannot continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Delay the destination asked for, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn is_expired_token(&self) -> bool {
        matches!(self, Self::Api { error, .. } if error == "ExpiredToken")
    }

    pub(crate) fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }

    /// Classify a non-success response.
    pub(crate) fn from_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let body: XrpcErrorBody = serde_json::from_str(body).unwrap_or_default();
        let error = body.error.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("UnknownError")
                .to_string()
        });
        let message = body.message.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS || error == "RateLimitExceeded" {
            return Self::RateLimited {
                retry_after: retry_after_from_headers(headers),
            };
        }

        if error == "ExpiredToken" {
            return Self::Api {
                status: status.as_u16(),
                error,
                message,
            };
        }

        if status == StatusCode::UNAUTHORIZED
            || matches!(
                error.as_str(),
                "AuthenticationRequired" | "InvalidToken" | "AccountTakedown" | "AuthFactorTokenRequired"
            )
        {
            let detail = if message.is_empty() { error } else { message };
            return Self::Authentication(detail);
        }

        Self::Api {
            status: status.as_u16(),
            error,
            message,
        }
    }
}

/// `retry-after` is in seconds; `ratelimit-reset` is a unix timestamp.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return u64::try_from(secs).ok().map(Duration::from_secs);
    }

    header("ratelimit-reset").map(|reset| {
        let wait = reset - Utc::now().timestamp();
        Duration::from_secs(u64::try_from(wait).unwrap_or(0))
    })
}
