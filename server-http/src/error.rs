use axum::{
    body::Body,
    extract::rejection::{BytesRejection, PathRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

/// Plain-text response; every reply of this service uses `text/plain`.
pub fn text_response(status: StatusCode, body: impl Into<Body>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body.into()).into_response()
}

/// Error side of a handler. Invalid keys and cache misses are ordinary 404s,
/// anything the backend fails with ends the request with a 500.
#[derive(Debug)]
pub enum ApiError {
    Cache(shared::Error),
    /// The request body could not be read, usually because it is over the limit.
    Body(BytesRejection),
}

impl From<shared::Error> for ApiError {
    fn from(err: shared::Error) -> Self {
        Self::Cache(err)
    }
}

/// A path that does not decode to UTF-8 cannot name a key.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Cache(shared::Error::InvalidKey(rejection.body_text()))
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::Body(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Cache(shared::Error::InvalidKey(key)) => {
                debug!("Rejected invalid key {:?}", key);
                text_response(StatusCode::NOT_FOUND, Body::empty())
            }
            Self::Cache(shared::Error::NotFound) => {
                text_response(StatusCode::NOT_FOUND, Body::empty())
            }
            Self::Cache(shared::Error::NotStored) => {
                text_response(StatusCode::CONFLICT, Body::empty())
            }
            Self::Cache(err) => {
                error!("Request failed: {}", err);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Body(rejection) => {
                warn!("Rejected request body: {}", rejection.body_text());
                text_response(rejection.status(), rejection.body_text())
            }
        }
    }
}
