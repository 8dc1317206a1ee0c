use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use doc_qa_core::{
    DecodedAnswer, GenerationError, IngestError, PipelineError, QaCoordinator, QuestionOutcome,
    SearchError,
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;
const MISSING_INPUT: &str = "Missing 'documents' URL or 'questions' list.";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<QaCoordinator>,
    pub started_at: Instant,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    documents: Option<String>,
    #[serde(default)]
    questions: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnswerSlot {
    Answer(DecodedAnswer),
    Failed { error: String },
}

#[derive(Debug, Serialize)]
struct FailedQuestion {
    index: usize,
    question: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    answers: Vec<AnswerSlot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<FailedQuestion>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    answer: DecodedAnswer,
    generation: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    generation: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        let status = match &error {
            PipelineError::Ingest(
                IngestError::Download { .. } | IngestError::DownloadStatus { .. },
            ) => StatusCode::BAD_GATEWAY,
            PipelineError::Ingest(IngestError::DocumentTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Ingest(IngestError::Io(_) | IngestError::Task(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Search(SearchError::IndexNotFound) => StatusCode::NOT_FOUND,
            PipelineError::Search(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Generation(GenerationError::MissingCredential) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::Generation(GenerationError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
        };

        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        PipelineError::from(error).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Downloads the document, indexes it and answers every question against that generation.
async fn run_handler(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let Json(payload) = payload?;
    let url = payload
        .documents
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::bad_input(MISSING_INPUT))?;
    if payload.questions.is_empty() {
        return Err(ApiError::bad_input(MISSING_INPUT));
    }

    let document = state.coordinator.fetch(url).await?;
    let batch = state
        .coordinator
        .ingest_and_answer(document, &payload.questions)
        .await?;

    let mut answers = Vec::with_capacity(batch.outcomes.len());
    let mut failures = Vec::new();
    for (index, outcome) in batch.outcomes.into_iter().enumerate() {
        match outcome {
            QuestionOutcome::Answered(report) => answers.push(AnswerSlot::Answer(report.answer)),
            QuestionOutcome::Failed { question, error } => {
                let error = error.to_string();
                answers.push(AnswerSlot::Failed {
                    error: error.clone(),
                });
                failures.push(FailedQuestion {
                    index,
                    question,
                    error,
                });
            }
        }
    }

    info!(
        generation = batch.ingestion.generation,
        answered = answers.len() - failures.len(),
        failed = failures.len(),
        "batch answered"
    );
    Ok(Json(RunResponse { answers, failures }))
}

/// Single question against whatever generation is current.
async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(payload) = payload?;
    if payload.query.trim().is_empty() {
        return Err(ApiError::bad_input("query is empty"));
    }

    let report = state.coordinator.ask(&payload.query).await?;
    Ok(Json(QueryResponse {
        answer: report.answer,
        generation: report.generation,
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let generation = state
        .coordinator
        .published_generation()
        .await
        .ok()
        .flatten();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        generation,
    })
}

pub fn build_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/hackrx/run", post(run_handler))
        .route("/hackrx/run", post(run_handler))
        .route("/query", post(query_handler))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    coordinator: Arc<QaCoordinator>,
    max_body_size: usize,
) -> std::io::Result<()> {
    let state = AppState {
        coordinator,
        started_at: Instant::now(),
    };
    let router = build_router(state, max_body_size);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await
}
