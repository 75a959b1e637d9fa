// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::api::server::AppState;
use crate::database_ops::catalog::catalog_counts;
use crate::jobs::import::ImportParams;
use crate::jobs::{JobKind, StartOutcome};
use crate::orchestrator::JobRequest;
use actix_web::{web, HttpResponse};

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = if state.orchestrator.db().ping().await {
        "connected"
    } else {
        "disconnected"
    };

    HttpResponse::Ok().json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    }))
}

fn start_response(kind: JobKind, outcome: StartOutcome) -> HttpResponse {
    let body = TriggerResponse { job: kind, outcome };
    match outcome {
        StartOutcome::Scheduled => HttpResponse::Accepted().json(ApiResponse::success(body)),
        StartOutcome::AlreadyRunning => HttpResponse::Conflict().json(ApiResponse {
            success: false,
            data: Some(body),
            error: Some(format!("{kind} is already running")),
            meta: Some(Meta::now()),
        }),
    }
}

fn stop_response(state: &AppState, kind: JobKind) -> HttpResponse {
    let stop_requested = state.orchestrator.stop(kind);
    HttpResponse::Ok().json(ApiResponse::success(StopResponse {
        job: kind,
        stop_requested,
    }))
}

/// Start a bulk import. An empty body uses the defaults; a body that does not
/// parse is rejected rather than replaced by them.
pub async fn start_import(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        ImportTriggerRequest::default()
    } else {
        match serde_json::from_slice::<ImportTriggerRequest>(&body) {
            Ok(req) => req,
            Err(err) => {
                return HttpResponse::BadRequest()
                    .json(ApiResponse::<()>::error(format!("invalid import request: {err}")));
            }
        }
    };
    let defaults = ImportParams::default();
    let params = ImportParams {
        total: req.total.unwrap_or(defaults.total),
        batch_size: req.batch_size.unwrap_or(defaults.batch_size),
        mode: req.mode.unwrap_or(defaults.mode),
    };
    if params.total == 0 || params.batch_size == 0 {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "total and batch_size must be greater than zero",
        ));
    }

    tracing::info!(
        total = params.total,
        batch_size = params.batch_size,
        mode = %params.mode,
        "import trigger requested"
    );
    let outcome = state.orchestrator.start(JobRequest::Import(params));
    start_response(JobKind::Import, outcome)
}

pub async fn stop_import(state: web::Data<AppState>) -> HttpResponse {
    stop_response(&state, JobKind::Import)
}

pub async fn start_tag_sync(state: web::Data<AppState>) -> HttpResponse {
    let outcome = state.orchestrator.start(JobRequest::TagSync);
    start_response(JobKind::TagSync, outcome)
}

pub async fn stop_tag_sync(state: web::Data<AppState>) -> HttpResponse {
    stop_response(&state, JobKind::TagSync)
}

pub async fn start_pulse(state: web::Data<AppState>) -> HttpResponse {
    let outcome = state.orchestrator.start(JobRequest::Pulse);
    start_response(JobKind::Pulse, outcome)
}

pub async fn stop_pulse(state: web::Data<AppState>) -> HttpResponse {
    stop_response(&state, JobKind::Pulse)
}

/// Run the availability sweep inline; it is a single short transaction.
pub async fn run_sweep(state: web::Data<AppState>) -> HttpResponse {
    match state.orchestrator.sweep().await {
        Ok(promoted) => HttpResponse::Ok().json(ApiResponse::success(SweepResponse { promoted })),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "sweep request failed");
            HttpResponse::InternalServerError().json(ApiResponse::<()>::error("sweep failed"))
        }
    }
}

pub async fn sync_status(state: web::Data<AppState>) -> HttpResponse {
    match catalog_counts(state.orchestrator.db()).await {
        Ok(catalog) => HttpResponse::Ok().json(ApiResponse::success(SyncStatusResponse {
            jobs: state.orchestrator.status(),
            catalog,
        })),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "status query failed");
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("failed to read catalog counts"))
        }
    }
}
