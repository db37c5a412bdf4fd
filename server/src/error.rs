use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failures reported by a [`crate::store::ConsoleStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("{table} row {id} not found")]
    RowMissing { table: &'static str, id: String },

    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
        }
        StoreError::Database(err)
    }
}

/// Errors surfaced to the agent. Every variant renders as a short message.
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        message: String,
        existing_conversation: Option<String>,
    },

    #[error("{0}")]
    Configuration(String),

    #[error("backend request failed: {0}")]
    Backend(#[source] StoreError),

    #[error("messaging gateway failed: {0}")]
    Gateway(String),
}

impl ConsoleError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConsoleError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>, existing_conversation: Option<String>) -> Self {
        ConsoleError::Conflict {
            message: message.into(),
            existing_conversation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleError::Validation(_) => "validation_error",
            ConsoleError::NotFound(_) => "not_found",
            ConsoleError::Conflict { .. } => "conflict_error",
            ConsoleError::Configuration(_) => "configuration_error",
            ConsoleError::Backend(_) | ConsoleError::Gateway(_) => "backend_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConsoleError::Validation(_) => StatusCode::BAD_REQUEST,
            ConsoleError::NotFound(_) => StatusCode::NOT_FOUND,
            ConsoleError::Conflict { .. } => StatusCode::CONFLICT,
            ConsoleError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ConsoleError::Backend(_) | ConsoleError::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<StoreError> for ConsoleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RowMissing { table, id } => {
                ConsoleError::NotFound(format!("{table} {id} not found"))
            }
            other => ConsoleError::Backend(other),
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let ConsoleError::Conflict {
            existing_conversation: Some(name),
            ..
        } = &self
        {
            body["existingConversation"] = json!(name);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_become_not_found() {
        let err: ConsoleError = StoreError::RowMissing {
            table: "conversations",
            id: "c-9".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "conversations c-9 not found");
    }

    #[test]
    fn store_failures_map_to_backend_kind() {
        let err: ConsoleError = StoreError::Decode("bad status".into()).into();
        assert_eq!(err.kind(), "backend_error");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ConsoleError::Gateway("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = ConsoleError::conflict("active conversation exists", Some("Ana".into()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "conflict_error");
    }
}
