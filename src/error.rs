use axum::http::{self, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

pub type AppResult<T> = std::result::Result<T, AppError>;

/// SQLite extended codes for primary key and unique violations, and the
/// Postgres SQLSTATE for the same.
const UNIQUE_VIOLATION_CODES: &[&str] = &["1555", "2067", "23505"];

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("That page does not exist")]
    NotFound,
    #[error("Your rate limit has been exceeded, please try again later")]
    Ratelimit,
    #[error("This request has been flagged as spam")]
    Spam,
    #[error("identifier collision")]
    Conflict,
    #[error("http error")]
    Http {
        #[from]
        source: http::Error,
    },
    #[error("database error")]
    Database { source: sqlx::Error },
    #[error("archive error")]
    Archive {
        #[from]
        source: zip::result::ZipError,
    },
    #[error("IO error")]
    IO {
        #[from]
        source: std::io::Error,
    },
    #[error("background task failed")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// The HTTP status every handler uses for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Ratelimit => StatusCode::TOO_MANY_REQUESTS,
            AppError::Spam => StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
            AppError::Conflict => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Http { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Archive { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IO { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Task { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the user is shown the error message itself. Everything else
    /// gets a generic page.
    fn is_expected(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_) | AppError::NotFound | AppError::Ratelimit | AppError::Spam
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if self.is_expected() {
            return (status_code, format!("{self}")).into_response();
        }

        match std::error::Error::source(&self) {
            Some(source) => error!("request failed: {self}: {source}"),
            None => error!("request failed: {self}"),
        }
        (status_code, "unknown error").into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(ref db_error) if is_unique_violation(db_error.as_ref()) => {
                AppError::Conflict
            }
            _ => AppError::Database { source },
        }
    }
}

fn is_unique_violation(error: &dyn sqlx::error::DatabaseError) -> bool {
    if let Some(code) = error.code() {
        if UNIQUE_VIOLATION_CODES.contains(&&*code) {
            return true;
        }
    }
    error.message().contains("UNIQUE constraint failed")
}
