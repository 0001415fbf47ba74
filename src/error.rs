use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Error group under which the gate's user-visible errors are registered.
pub const INIT_ERROR_GROUP: &str = "init";

/// Response languages understood by the gateway's error catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    #[default]
    EnUs,
    ZhCn,
}

impl Lang {
    /// Wire name of the language (`en_us`, `zh_cn`).
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::EnUs => "en_us",
            Lang::ZhCn => "zh_cn",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en_us" => Ok(Lang::EnUs),
            "zh_cn" => Ok(Lang::ZhCn),
            other => Err(format!("unsupported language `{other}` (expected en_us or zh_cn)")),
        }
    }
}

/// Errors surfaced to API callers by the initialization gate.
///
/// These carry no dynamic fields. The message shown to the caller is looked
/// up from a fixed catalogue by [`Lang`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Module is waiting for initialization!")]
    ModuleInitWaiting,
}

impl ApiError {
    /// Stable error code written into the `CODE` field of the envelope.
    pub fn code(self) -> &'static str {
        match self {
            ApiError::ModuleInitWaiting => "ModuleInitWaiting",
        }
    }

    /// Group the error is registered under.
    pub fn group(self) -> &'static str {
        match self {
            ApiError::ModuleInitWaiting => INIT_ERROR_GROUP,
        }
    }

    /// Localized message for `lang`.
    pub fn message(self, lang: Lang) -> &'static str {
        match (self, lang) {
            (ApiError::ModuleInitWaiting, Lang::EnUs) => "Module is waiting for initialization!",
            (ApiError::ModuleInitWaiting, Lang::ZhCn) => "模块正在等待初始化！",
        }
    }

    /// HTTP status paired with the error.
    pub fn status(self) -> StatusCode {
        match self {
            ApiError::ModuleInitWaiting => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Bind the error to a response language.
    pub fn localized(self, lang: Lang) -> LocalizedError {
        LocalizedError { error: self, lang }
    }
}

/// An [`ApiError`] paired with the language the caller asked for.
#[derive(Debug, Clone, Copy)]
pub struct LocalizedError {
    pub error: ApiError,
    pub lang: Lang,
}

/// Error envelope written by the gateway.
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    #[serde(rename = "CODE")]
    code: &'a str,
    #[serde(rename = "MESSAGE")]
    message: &'a str,
}

impl IntoResponse for LocalizedError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            code: self.error.code(),
            message: self.error.message(self.lang),
        };
        (self.error.status(), axum::Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.localized(Lang::default()).into_response()
    }
}

/// Programming-level signals from [`InitGate`](crate::gate::InitGate).
///
/// These are never shown to API callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("gate is already initialized")]
    AlreadyInitialized,

    #[error("another initialization request is in progress")]
    InitInProgress,
}

/// Application-wide error types with appropriate HTTP status codes.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        tracing::error!(error = %self, "Request failed");

        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg.as_str()),
            AppError::PayloadTooLarge(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PayloadTooLarge",
                "Request body exceeds the configured limit.",
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ConfigError",
                "Service configuration error. Please contact support.",
            ),
        };

        (status, axum::Json(ErrorEnvelope { code, message })).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
