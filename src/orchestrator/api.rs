//! HTTP API for the job service.
//!
//! | Method | Path                  | Operation                            |
//! |--------|-----------------------|--------------------------------------|
//! | POST   | `/jobs`               | start a job                          |
//! | GET    | `/jobs`               | list job ids                         |
//! | GET    | `/jobs/{job_id}`      | current status                       |
//! | GET    | `/jobs/{job_id}/logs` | live log lines as Server-Sent Events |
//! | GET    | `/health`             | liveness, unauthenticated            |

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use tower_http::trace::TraceLayer;

use crate::error::RegistryError;
use crate::orchestrator::auth::{ApiKeyAuth, api_key_middleware};
use crate::orchestrator::registry::JobRegistry;
use crate::protocol::{
    ErrorBody, JobStatusResponse, ListJobsResponse, StartJobRequest, StartJobResponse, log_events,
};

/// Shared state for the job API.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<JobRegistry>,
    pub auth: ApiKeyAuth,
}

/// The job service's HTTP API.
pub struct JobApi;

impl JobApi {
    /// Build the axum router.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/jobs", get(list_jobs).post(start_job))
            .route("/jobs/{job_id}", get(get_job_status))
            .route("/jobs/{job_id}/logs", get(watch_job_logs))
            .route_layer(axum::middleware::from_fn_with_state(
                state.auth.clone(),
                api_key_middleware,
            ))
            // Unauthenticated routes (added after the layer).
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve the API on `addr` until `shutdown` resolves.
    pub async fn serve(
        state: ApiState,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if state.auth.is_enabled() {
            tracing::info!("Authorization enabled (API key is set)");
        } else {
            tracing::warn!("Authorization disabled (API key is not set)");
        }

        let router = Self::router(state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Job service listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Error response for API handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Registry(RegistryError),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Registry(e @ RegistryError::JobNotFound { .. }) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Registry(e) => {
                tracing::error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

async fn start_job(
    State(state): State<ApiState>,
    Json(req): Json<StartJobRequest>,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    if req.command.trim().is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".to_string()));
    }
    req.limits.validate().map_err(ApiError::BadRequest)?;

    let job_id = state.registry.start_job(&req.command, &req.limits).await?;

    Ok((StatusCode::CREATED, Json(StartJobResponse { job_id })))
}

async fn list_jobs(State(state): State<ApiState>) -> Json<ListJobsResponse> {
    Json(ListJobsResponse {
        job_ids: state.registry.list_jobs().await,
    })
}

async fn get_job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let status = state.registry.get_job_status(&job_id).await?;
    Ok(Json(JobStatusResponse { job_id, status }))
}

/// Stream a job's output. Each line is a `line` event; the stream ends with
/// a single `complete` or `error` event.
async fn watch_job_logs(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let logs = state.registry.watch_job_logs(&job_id).await?;

    let events = futures::stream::unfold(Some(logs), move |logs| async move {
        let mut logs = logs?;
        let (event, next) = match logs.next().await {
            Some(Ok(line)) => (Event::default().event(log_events::LINE).data(line), Some(logs)),
            Some(Err(e)) => (
                Event::default().event(log_events::ERROR).data(e.to_string()),
                None,
            ),
            None => (Event::default().event(log_events::COMPLETE).data(""), None),
        };
        Some((Ok::<_, Infallible>(event), next))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
