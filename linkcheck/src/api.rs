/// HTTP API module for the LinkCheck service
///
/// Thin routing and JSON marshalling over the store and the task queue.
use crate::{
    checker::{Probe, check_links},
    model::{LinkStatus, LinksNum, PendingTask},
    queue::{EnqueueOutcome, QueueError, TaskQueue},
    report::{self, ReportError},
    store::{Store, StoreError},
};
use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub queue: Arc<TaskQueue>,
    pub probe: Arc<dyn Probe>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitLinksRequest {
    pub links: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitLinksResponse {
    pub links: BTreeMap<String, LinkStatus>,
    pub links_num: LinksNum,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub links_list: Vec<LinksNum>,
}

#[derive(Debug, Deserialize)]
pub struct RecheckRequest {
    pub links_num: LinksNum,
    pub links: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecheckResponse {
    pub links_num: LinksNum,
    pub dispatched: usize,
    pub deferred: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub pending: usize,
    pub tasks: Vec<PendingTask>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{accepted} of {total} links accepted before failure: {source}")]
    PartialRecheck {
        accepted: usize,
        total: usize,
        #[source]
        source: QueueError,
    },

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Queue(e) | ApiError::PartialRecheck { source: e, .. } => {
                queue_status_code(e)
            }
            ApiError::Store(_) | ApiError::Report(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, self.to_string()).into_response()
    }
}

fn queue_status_code(e: &QueueError) -> StatusCode {
    match e {
        QueueError::ShuttingDown | QueueError::NotStarted => StatusCode::SERVICE_UNAVAILABLE,
        QueueError::ShutdownTimeout(_) | QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid request: {}", rejection.body_text()))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submit", post(submit_links))
        .route("/report", post(get_report))
        .route("/recheck", post(recheck_links))
        .route("/status", get(queue_status))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
}

/// Checks a new batch synchronously and stores it.
async fn submit_links(
    State(state): State<AppState>,
    payload: Result<Json<SubmitLinksRequest>, JsonRejection>,
) -> Result<Json<SubmitLinksResponse>, ApiError> {
    let Json(request) = payload?;
    if request.links.is_empty() {
        return Err(ApiError::BadRequest("links list is empty".into()));
    }

    // Dropping the request future cancels the checks, so a fresh token is enough.
    let links = check_links(state.probe.as_ref(), &request.links, &CancellationToken::new()).await;
    let links_num = state.store.add_links_set(links.clone()).await;
    state.store.save().await?;

    tracing::info!("Links set {} stored with {} links", links_num, links.len());
    Ok(Json(SubmitLinksResponse { links, links_num }))
}

async fn get_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.links_list.is_empty() {
        return Err(ApiError::BadRequest("links_list is empty".into()));
    }

    let links_sets = state.store.get_links_sets(&request.links_list).await;
    if links_sets.is_empty() {
        return Err(ApiError::NotFound(
            "no links sets found for the requested numbers".into(),
        ));
    }

    let body = report::render(&links_sets)?;
    let disposition = format!(
        "attachment; filename={}",
        report::file_name(&request.links_list)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Queues a fresh check of some links of an existing batch.
async fn recheck_links(
    State(state): State<AppState>,
    payload: Result<Json<RecheckRequest>, JsonRejection>,
) -> Result<Json<RecheckResponse>, ApiError> {
    let Json(request) = payload?;
    if request.links.is_empty() {
        return Err(ApiError::BadRequest("links list is empty".into()));
    }
    if !state.store.has_links_set(request.links_num).await {
        return Err(ApiError::NotFound(format!(
            "links set {} not found",
            request.links_num
        )));
    }

    let mut response = RecheckResponse {
        links_num: request.links_num,
        dispatched: 0,
        deferred: 0,
    };
    for url in &request.links {
        match state.queue.enqueue(request.links_num, url).await {
            Ok(EnqueueOutcome::Dispatched) => response.dispatched += 1,
            Ok(EnqueueOutcome::Deferred) => response.deferred += 1,
            Err(source) => {
                // Links accepted so far stay queued; the caller learns how many.
                return Err(ApiError::PartialRecheck {
                    accepted: response.dispatched + response.deferred,
                    total: request.links.len(),
                    source,
                });
            }
        }
    }

    Ok(Json(response))
}

async fn queue_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let tasks = state.queue.pending_tasks().await;
    Json(StatusResponse {
        pending: tasks.len(),
        tasks,
    })
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    if status >= 500 {
        tracing::error!("{} {} -> {} in {:.1}ms", method, path, status, latency_ms);
    } else {
        tracing::debug!("{} {} -> {} in {:.1}ms", method, path, status, latency_ms);
    }

    response
}
