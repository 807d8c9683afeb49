//! Client-facing HTTP surface backed by any [`QrmIfc`] implementation.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::core::{QrmIfc, ResourcesRequest, ResourcesRequestResponse, ServerStatus};
use crate::runtime::api::{
    canceled_token_msg, ActiveResponse, ApiError, TokenBody, URL_GET_IS_REQUEST_ACTIVE,
    URL_GET_NEW_TOKEN, URL_GET_ROOT, URL_GET_TOKEN_STATUS, URL_POST_CANCEL_TOKEN,
    URL_POST_NEW_REQUEST,
};

/// Shared handle to the engine behind the transport routes.
pub type Backend = Arc<dyn QrmIfc>;

/// Build the transport router.
pub fn router(backend: Backend) -> Router {
    Router::new()
        .route(URL_GET_ROOT, get(root_handler))
        .route(URL_POST_NEW_REQUEST, post(new_request_handler))
        .route(URL_POST_CANCEL_TOKEN, post(cancel_token_handler))
        .route(URL_GET_TOKEN_STATUS, get(token_status_handler))
        .route(URL_GET_NEW_TOKEN, get(new_token_handler))
        .route(URL_GET_IS_REQUEST_ACTIVE, get(is_request_active_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(backend)
}

async fn root_handler(State(backend): State<Backend>) -> Result<&'static str, ApiError> {
    match backend.broker_status().await? {
        ServerStatus::Active => Ok("1"),
        ServerStatus::Disabled => Ok("0"),
    }
}

async fn new_request_handler(
    State(backend): State<Backend>,
    Json(request): Json<ResourcesRequest>,
) -> Result<Json<ResourcesRequestResponse>, ApiError> {
    let response = backend.new_request(request).await?;
    Ok(Json(response))
}

async fn cancel_token_handler(
    State(backend): State<Backend>,
    Json(body): Json<TokenBody>,
) -> Result<String, ApiError> {
    backend.cancel_request(&body.token).await?;
    Ok(canceled_token_msg(&body.token))
}

async fn token_status_handler(
    State(backend): State<Backend>,
    Query(query): Query<TokenBody>,
) -> Result<Json<ResourcesRequestResponse>, ApiError> {
    let response = backend.get_filled_request(&query.token).await?;
    Ok(Json(response))
}

async fn new_token_handler(
    State(backend): State<Backend>,
    Query(query): Query<TokenBody>,
) -> Json<TokenBody> {
    Json(TokenBody {
        token: backend.get_new_token(&query.token).await,
    })
}

async fn is_request_active_handler(
    State(backend): State<Backend>,
    Query(query): Query<TokenBody>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let active = backend.is_request_active(&query.token).await?;
    Ok(Json(ActiveResponse {
        token: query.token,
        active,
    }))
}
