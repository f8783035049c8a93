use crate::compliance::export::ExportError;
use crate::compliance::lifecycle::LifecycleError;
use crate::compliance::reminders::ReminderError;
use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Lifecycle(LifecycleError),
    Reminder(ReminderError),
    Export(ExportError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Lifecycle(err) => write!(f, "certificate lifecycle error: {}", err),
            AppError::Reminder(err) => write!(f, "reminder scheduler error: {}", err),
            AppError::Export(err) => write!(f, "export error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Lifecycle(err) => Some(err),
            AppError::Reminder(err) => Some(err),
            AppError::Export(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Lifecycle(err) => return err.into_response(),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Reminder(_)
            | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<LifecycleError> for AppError {
    fn from(value: LifecycleError) -> Self {
        Self::Lifecycle(value)
    }
}

impl From<ReminderError> for AppError {
    fn from(value: ReminderError) -> Self {
        Self::Reminder(value)
    }
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        Self::Export(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::domain::CoiId;

    #[test]
    fn lifecycle_errors_keep_their_status_codes() {
        let not_found = AppError::from(LifecycleError::NotFound(CoiId("coi-404".to_string())));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let config = AppError::from(ConfigError::InvalidPort);
        assert_eq!(
            config.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
