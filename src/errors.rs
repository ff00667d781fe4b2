use crate::files::FsError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("too many requests")]
    RateLimited,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::RateLimited => "RateLimited",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Fs(e) => match e {
                FsError::InvalidRoot => "InvalidRoot",
                FsError::PathEscape => "PathEscape",
                FsError::NotFound(_) => "NotFound",
                FsError::AlreadyExists(_) => "AlreadyExists",
                FsError::Io { .. } => "IOError",
                FsError::Archive(_) => "ArchiveError",
                FsError::ArchiveTooLarge { .. } => "ArchiveTooLarge",
            },
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) | AppError::Fs(FsError::InvalidRoot) => StatusCode::BAD_REQUEST,
            AppError::Fs(FsError::PathEscape) => StatusCode::FORBIDDEN,
            AppError::Fs(FsError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Fs(FsError::AlreadyExists(_)) => StatusCode::CONFLICT,
            AppError::Fs(FsError::ArchiveTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Fs(FsError::Io { .. } | FsError::Archive(_)) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.to_string();
        if matches!(self, AppError::Unauthorized) {
            return (
                status,
                [(header::WWW_AUTHENTICATE, r#"Basic realm="Restricted""#)],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}
