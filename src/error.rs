use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Every failure a handler can produce. Each variant carries the
/// externally visible message; the mapping to an HTTP status lives here
/// and nowhere else.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("this page does not exist")]
    PageOutOfRange,
    #[error("you are not logged in, please log in to get access")]
    NotAuthenticated,
    #[error("incorrect email or password")]
    IncorrectCredentials,
    #[error("invalid or expired token, please log in again")]
    InvalidToken,
    #[error("password was changed recently, please log in again")]
    StaleToken,
    #[error("the user belonging to this token no longer exists")]
    SubjectGone,
    #[error("you do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("there was an error sending the email, please try again later")]
    MailDelivery,
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Status code and client-facing message. Store errors are translated
    /// here so constraint violations read as validation failures instead of
    /// leaking driver internals.
    fn parts(&self) -> (StatusCode, String) {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::PageOutOfRange => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotAuthenticated
            | ApiError::IncorrectCredentials
            | ApiError::InvalidToken
            | ApiError::StaleToken
            | ApiError::SubjectGone => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::MailDelivery => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::Store(sqlx::Error::RowNotFound) => {
                (StatusCode::NOT_FOUND, "resource not found".into())
            }
            ApiError::Store(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
                Some("23505") => (
                    StatusCode::BAD_REQUEST,
                    "duplicate field value, please use another value".into(),
                ),
                Some("23503") | Some("23514") | Some("23502") | Some("22P02") => (
                    StatusCode::BAD_REQUEST,
                    "invalid input data for this resource".into(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "something went wrong".into(),
                ),
            },
            ApiError::Store(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "something went wrong".into(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = self.parts();
        if code.is_server_error() {
            error!(error = %self, "request failed");
        }
        let status = if code.is_server_error() {
            "error"
        } else {
            "fail"
        };
        let body = Json(json!({ "status": status, "message": message }));
        (code, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_fail_statuses() {
        let (code, msg) = ApiError::Validation("bad".into()).parts();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(msg, "bad");

        let (code, _) = ApiError::PageOutOfRange.parts();
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = ApiError::NotAuthenticated.parts();
        assert_eq!(code, StatusCode::UNAUTHORIZED);

        let (code, _) = ApiError::Forbidden.parts();
        assert_eq!(code, StatusCode::FORBIDDEN);

        let (code, msg) = ApiError::NotFound("no tour found with that id".into()).parts();
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(msg, "no tour found with that id");
    }

    #[test]
    fn unexpected_errors_hide_internals() {
        let (code, msg) = ApiError::Internal(anyhow::anyhow!("secret detail")).parts();
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(msg, "something went wrong");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let (code, _) = ApiError::Store(sqlx::Error::RowNotFound).parts();
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
