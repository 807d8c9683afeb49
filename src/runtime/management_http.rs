//! Management HTTP surface. Writes go straight to the pool under the engine lock,
//! taken on the blocking pool.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::core::{BrokerSnapshot, KvStore, QueueManager, Resource};
use crate::runtime::api::{
    ApiError, CountResponse, JobBody, ReleaseResponse, RemoveQuery, ResourceNameBody,
    ResourceRef, ResourceStatusBody, ServerStatusBody, ADD_JOB_TO_RESOURCE, ADD_RESOURCES,
    FORCE_RELEASE, REMOVE_JOB, REMOVE_RESOURCES, SET_RESOURCE_STATUS, SET_SERVER_STATUS, STATUS,
};

/// Build the management router.
pub fn router<S>(manager: QueueManager<S>) -> Router
where
    S: KvStore + 'static,
{
    Router::new()
        .route(ADD_RESOURCES, post(add_resources::<S>))
        .route(REMOVE_RESOURCES, post(remove_resources::<S>))
        .route(STATUS, get(status::<S>))
        .route(SET_SERVER_STATUS, post(set_server_status::<S>))
        .route(SET_RESOURCE_STATUS, post(set_resource_status::<S>))
        .route(ADD_JOB_TO_RESOURCE, post(add_job_to_resource::<S>))
        .route(REMOVE_JOB, post(remove_job::<S>))
        .route(FORCE_RELEASE, post(force_release::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn add_resources<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(resources): Json<Vec<Resource>>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = manager
        .blocking(move |qm| qm.add_resources(resources))
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn remove_resources<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Query(query): Query<RemoveQuery>,
    Json(resources): Json<Vec<ResourceRef>>,
) -> Result<Json<CountResponse>, ApiError> {
    let names: Vec<String> = resources.into_iter().map(|r| r.name).collect();
    let count = manager
        .blocking(move |qm| qm.remove_resources(&names, query.force))
        .await?;
    Ok(Json(CountResponse { count }))
}

async fn status<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
) -> Result<Json<BrokerSnapshot>, ApiError> {
    Ok(Json(manager.blocking(|qm| qm.status()).await?))
}

async fn set_server_status<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(body): Json<ServerStatusBody>,
) -> Result<String, ApiError> {
    let status = body.status;
    manager
        .blocking(move |qm| qm.set_server_status(status))
        .await?;
    Ok(format!("server status set to {}", body.status.as_str()))
}

async fn set_resource_status<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(body): Json<ResourceStatusBody>,
) -> Result<String, ApiError> {
    let (name, status, force) = (body.resource_name.clone(), body.status, body.force);
    manager
        .blocking(move |qm| qm.set_resource_status(&name, status, force))
        .await?;
    Ok(format!("resource {} set to {}", body.resource_name, body.status))
}

async fn add_job_to_resource<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(body): Json<JobBody>,
) -> Result<String, ApiError> {
    let (name, job) = (body.resource_name.clone(), body.job.clone());
    manager
        .blocking(move |qm| qm.add_job_to_resource(&name, &job))
        .await?;
    Ok(format!("job {} added to {}", body.job, body.resource_name))
}

async fn remove_job<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(body): Json<ResourceNameBody>,
) -> Result<String, ApiError> {
    let name = body.resource_name.clone();
    manager.blocking(move |qm| qm.remove_job(&name)).await?;
    Ok(format!("job removed from {}", body.resource_name))
}

async fn force_release<S: KvStore + 'static>(
    State(manager): State<QueueManager<S>>,
    Json(body): Json<ResourceNameBody>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let name = body.resource_name.clone();
    let holder = manager
        .blocking(move |qm| qm.force_release(&name))
        .await?;
    Ok(Json(ReleaseResponse {
        resource_name: body.resource_name,
        holder,
    }))
}
