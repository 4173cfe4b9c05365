use crate::error::{text_response, ApiError};
use crate::state::AppState;
use crate::ttl::extract_ttl;
use axum::{
    body::Body,
    extract::{
        rejection::{BytesRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use restmc::keys::{derive_key, split_path, write_target, WriteTarget};
use restmc::planes::data::cache_operations::parse_amount;
use restmc::planes::data::CacheOperations;
use restmc::Outcome;
use tracing::info;

/// Status code and body for each cache outcome
pub fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Found(value) => text_response(StatusCode::OK, value),
        Outcome::NotFound => text_response(StatusCode::NOT_FOUND, Body::empty()),
        Outcome::Stored | Outcome::Deleted => text_response(StatusCode::OK, Body::empty()),
        Outcome::NotStored => text_response(StatusCode::CONFLICT, Body::empty()),
        Outcome::Adjusted(value) => text_response(StatusCode::OK, value.to_string()),
    }
}

/// GET /*path
pub async fn get_value(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    info!("GET: path=/{}", path);

    let key = derive_key(split_path(&path))?;
    let outcome = state.cache_operations.fetch(&key).await?;
    Ok(outcome_response(outcome))
}

/// PUT /*path
pub async fn put_value(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    let body = body?;
    info!("PUT: path=/{}, bytes={}", path, body.len());

    let ttl = extract_ttl(&headers);
    let outcome = match write_target(&split_path(&path))? {
        WriteTarget::Literal(key) => state.cache_operations.write(&key, body, ttl).await?,
        WriteTarget::Adjust { adjustment, key } => {
            state
                .cache_operations
                .adjust(&key, adjustment, parse_amount(&body), ttl)
                .await?
        }
    };
    Ok(outcome_response(outcome))
}

/// POST /*path
pub async fn post_value(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    let body = body?;
    info!("POST: path=/{}, bytes={}", path, body.len());

    let ttl = extract_ttl(&headers);
    let outcome = match write_target(&split_path(&path))? {
        WriteTarget::Literal(key) => state.cache_operations.create(&key, body, ttl).await?,
        WriteTarget::Adjust { adjustment, key } => {
            state
                .cache_operations
                .adjust(&key, adjustment, parse_amount(&body), ttl)
                .await?
        }
    };
    Ok(outcome_response(outcome))
}

/// DELETE /*path
pub async fn delete_value(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    info!("DELETE: path=/{}", path);

    let key = derive_key(split_path(&path))?;
    let outcome = state.cache_operations.delete(&key).await?;
    Ok(outcome_response(outcome))
}

/// Any verb on `/`: the path maps to the empty key.
pub async fn empty_path() -> Result<Response, ApiError> {
    Err(shared::Error::InvalidKey(String::new()).into())
}
