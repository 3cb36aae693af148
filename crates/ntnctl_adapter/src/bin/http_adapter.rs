#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{
        header::{CACHE_CONTROL, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ntnctl_adapter::{
    init_tracing, session_cookie_from_header, AdapterConfig, AdapterError, AdapterRuntime,
    ApiErrorResponse, GrpcCrisisScorer, UpdateRequestBody,
};
use ntnctl_kernel_contracts::UnixTimeNs;
use ntnctl_os::update::UpdateError;

type SharedRuntime = Arc<AdapterRuntime<GrpcCrisisScorer>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = AdapterConfig::from_env();
    let addr: SocketAddr = config.http_bind.parse()?;

    let repo = config.open_store()?;
    let scorer = GrpcCrisisScorer::connect_lazy(
        &config.grpc_addr,
        Duration::from_millis(config.inference_timeout_ms),
    )?;
    let runtime: SharedRuntime = Arc::new(AdapterRuntime::new(repo, &config, scorer)?);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/session", get(load_session))
        .route("/api/history", get(history))
        .route("/api/update", post(submit_update))
        .route("/api/release", post(release))
        .with_state(runtime);

    tracing::info!(
        %addr,
        grpc_addr = %config.grpc_addr,
        lease_ttl_ms = config.lease_ttl_ms,
        "ntnctl_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("ntnctl_http shutting down");
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session_cookie_from_header)
}

fn with_set_cookie(mut resp: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            resp.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => tracing::error!(error = %err, "session cookie is not a valid header value"),
    }
    resp
}

fn internal_error(err: AdapterError) -> Response {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorResponse::internal()),
    )
        .into_response()
}

fn update_error_status(err: &UpdateError) -> StatusCode {
    match err {
        UpdateError::Unauthorized => StatusCode::UNAUTHORIZED,
        UpdateError::Forbidden => StatusCode::FORBIDDEN,
        UpdateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        UpdateError::InferenceUnavailable(_) | UpdateError::PersistenceFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    let report = runtime.health_report();
    let status = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report)).into_response()
}

async fn load_session(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let cookie = session_cookie(&headers);
    match runtime.load_session(cookie.as_deref(), UnixTimeNs::now()) {
        Ok(out) => {
            let resp = (StatusCode::OK, Json(out.response)).into_response();
            match out.set_cookie {
                Some(cookie) => with_set_cookie(resp, &cookie),
                None => resp,
            }
        }
        Err(err) => internal_error(err),
    }
}

async fn history(State(runtime): State<SharedRuntime>) -> Response {
    match runtime.history_report(UnixTimeNs::now()) {
        Ok(report) => (
            StatusCode::OK,
            [(CACHE_CONTROL, "no-store")],
            Json(report),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

async fn submit_update(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(body): Json<UpdateRequestBody>,
) -> Response {
    let cookie = session_cookie(&headers);
    match runtime
        .submit_update(cookie.as_deref(), body, UnixTimeNs::now())
        .await
    {
        Ok(out) => (StatusCode::OK, Json(out)).into_response(),
        Err(err) => (
            update_error_status(&err),
            Json(ApiErrorResponse::from_update_error(&err)),
        )
            .into_response(),
    }
}

async fn release(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let cookie = session_cookie(&headers);
    let out = runtime.release(cookie.as_deref());
    let resp = match out.result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => internal_error(err),
    };
    with_set_cookie(resp, &out.set_cookie)
}
