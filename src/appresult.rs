use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<Error>() {
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::Forbidden) => StatusCode::FORBIDDEN,
            Some(Error::Conflict(_)) => StatusCode::CONFLICT,
            Some(Error::Invalid(_)) | Some(Error::NotJoined(_)) | Some(Error::Presence(_)) => StatusCode::BAD_REQUEST,
            Some(Error::Unauthorized) => StatusCode::UNAUTHORIZED,
            Some(Error::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.downcast_ref::<Error>() {
            Some(err) => err.client_message(),
            None => "internal server error".to_owned(),
        };

        if status.is_server_error() {
            tracing::error!(%status, "{:#}", self.0);
        } else {
            tracing::debug!(%status, "{:#}", self.0);
        }

        (
            status,
            Json(json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
