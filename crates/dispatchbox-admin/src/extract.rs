//! `Query`/`Path` wrappers that report extraction failures as `{"error":
//! "..."}`, the same envelope `ErrorResponse` uses everywhere else on this
//! surface, instead of axum's default plain-text rejection body. Same
//! motivation as the manual body parsing in
//! `routes::retry_dead_events_batch`, applied to the other two extractors.

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::api_types::ErrorResponse;

/// `Query<T>` whose rejection renders as the admin surface's JSON error shape.
pub(crate) struct JsonQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for JsonQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(JsonQuery(value)),
            Err(rejection) => {
                let message = rejection.to_string();
                let status = rejection.into_response().status();
                Err((status, Json(ErrorResponse::new(message))).into_response())
            }
        }
    }
}

/// `Path<T>` whose rejection renders as the admin surface's JSON error shape.
pub(crate) struct JsonPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for JsonPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(JsonPath(value)),
            Err(rejection) => {
                let message = rejection.to_string();
                let status = rejection.into_response().status();
                Err((status, Json(ErrorResponse::new(message))).into_response())
            }
        }
    }
}
