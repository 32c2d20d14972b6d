//! Extractors whose rejections render through [`AppError`] like every other failure.

use axum::{
    extract::{rejection::{JsonRejection, PathRejection}, FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{AppError, Error};

/// `Json<T>`, rejected with a 400 `{success: false, message}` body.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| Error::invalid(rejection.body_text()))?;
        Ok(AppJson(value))
    }
}

/// The `{room_id}` segment of a room route.
pub struct RoomId(pub Uuid);

impl<S> FromRequestParts<S> for RoomId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(room_id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: PathRejection| match rejection {
                PathRejection::FailedToDeserializePathParams(_) => {
                    Error::invalid("room id must be a UUID")
                }
                other => Error::invalid(other.body_text()),
            })?;
        Ok(RoomId(room_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode};

    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    #[tokio::test]
    async fn bad_json_is_a_bad_request() {
        let req = axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let err = AppJson::<Named>::from_request(req, &()).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
