use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::warn;

use crate::{
    error::EngineError,
    models::{JobKind, StartRequest, TrackRequest},
    AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/events", get(stream_events))
        .route(
            "/v1/jobs/{kind}",
            get(get_job).post(start_job).delete(stop_job),
        )
        .route("/v1/jobs/{kind}/track", post(track_job))
        .route("/v1/jobs/{kind}/reset", post(reset_job))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message.into()
            }
        })),
    )
        .into_response()
}

fn parse_kind(raw: &str) -> Result<JobKind, Response> {
    raw.parse::<JobKind>().map_err(|err| {
        error_response(StatusCode::NOT_FOUND, "UNKNOWN_JOB_KIND", err.to_string())
    })
}

fn engine_error_response(err: EngineError) -> Response {
    match err {
        EngineError::AlreadyActive(existing) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": {
                    "code": "JOB_ALREADY_ACTIVE",
                    "message": format!("A {} job is already running.", existing.kind)
                },
                "job": existing
            })),
        )
            .into_response(),
        EngineError::NoJobStarted(kind) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "NO_JOB_STARTED",
            format!("The server did not start a {kind} job."),
        ),
        EngineError::Start { source, .. } => {
            error_response(StatusCode::BAD_GATEWAY, "START_FAILED", source.to_string())
        }
        EngineError::Store(err) => {
            error_response(StatusCode::CONFLICT, "JOB_NOT_ACTIVE", err.to_string())
        }
    }
}

pub async fn start_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<StartRequest>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    match state.engine.start(kind, &payload).await {
        Ok(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        Err(err) => {
            warn!(kind = %kind, "Start request failed: {err}");
            engine_error_response(err)
        }
    }
}

pub async fn track_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<TrackRequest>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    if payload.job_id.as_str().trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_TRACK_REQUEST",
            "Request must include a job id.",
        );
    }

    match state.engine.track(kind, payload.job_id) {
        Ok(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    (StatusCode::OK, Json(state.engine.view(kind).await)).into_response()
}

pub async fn stop_job(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    match state.engine.stop(kind) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn reset_job(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    let previous = state.engine.reset(kind);
    (
        StatusCode::OK,
        Json(json!({ "kind": kind, "status": "pending", "previous": previous })),
    )
        .into_response()
}

pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|message| match message {
        Ok(envelope) => Event::default()
            .event(envelope.event.name())
            .id(envelope.id.to_string())
            .json_data(&envelope)
            .ok()
            .map(Ok::<_, Infallible>),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event stream subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        engine::{EngineSettings, JobEngine},
        events::EventBroadcaster,
        models::{JobId, StartedJob},
        testing::ScriptedBackend,
        transport::Collaborators,
    };

    fn app(backend: &Arc<ScriptedBackend>) -> Router {
        let events = EventBroadcaster::new(16);
        let engine = JobEngine::new(
            EngineSettings::default(),
            Collaborators::from_client(backend.clone()),
            Arc::new(events.clone()),
            Arc::new(events.clone()),
        );
        router(AppState { engine, events })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_kind_is_not_found() {
        let app = app(&ScriptedBackend::new());
        let (status, body) = send(&app, Method::GET, "/v1/jobs/inventory", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "UNKNOWN_JOB_KIND");
    }

    #[tokio::test(start_paused = true)]
    async fn track_is_single_flight_and_stop_ends_job() {
        let app = app(&ScriptedBackend::new());
        let track = json!({ "jobId": "J1" });

        let (status, body) =
            send(&app, Method::POST, "/v1/jobs/find_issues/track", Some(track.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "starting");

        let (status, body) =
            send(&app, Method::POST, "/v1/jobs/find_issues/track", Some(json!({ "jobId": "J2" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "JOB_ALREADY_ACTIVE");
        assert_eq!(body["job"]["id"], "J1");

        let (status, body) = send(&app, Method::GET, "/v1/jobs/find_issues", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processing"], true);

        let (status, body) = send(&app, Method::DELETE, "/v1/jobs/find_issues", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "stopped");

        let (status, _) = send(&app, Method::DELETE, "/v1/jobs/find_issues", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, Method::POST, "/v1/jobs/find_issues/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previous"]["status"], "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_run_id_is_unprocessable() {
        let backend = ScriptedBackend::new();
        let app = app(&backend);
        let (status, body) =
            send(&app, Method::POST, "/v1/jobs/catalog_ai", Some(json!({ "path": "/srv" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "NO_JOB_STARTED");

        backend.set_start_response(Ok(StartedJob {
            id: Some(JobId::from("R1")),
        }));
        let (status, body) =
            send(&app, Method::POST, "/v1/jobs/catalog_ai", Some(json!({ "path": "/srv" }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["id"], "R1");
        assert_eq!(body["kind"], "catalog_ai");
    }
}
