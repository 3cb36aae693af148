#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ntnctl_engines::lease::{LeaseConfig, LeasePolicyRuntime};
use ntnctl_engines::ntn::NtnStateMachine;
use ntnctl_engines::sequence::pad_history;
use ntnctl_kernel_contracts::inference::{CrisisScoreRequest, CrisisScoreResponse};
use ntnctl_kernel_contracts::kpi::{KpiSample, KpiVector};
use ntnctl_kernel_contracts::lease::{ClientIdentity, ControllerRole};
use ntnctl_kernel_contracts::ntn::{NtnState, NtnStatus};
use ntnctl_kernel_contracts::sequence::KPI_SEQ_LEN;
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs};
use ntnctl_os::inference::{CrisisScoringEngine, InferenceError};
use ntnctl_os::lease::LeaseError;
use ntnctl_os::update::{KpiUpdateRequest, UpdateError, UpdateOrchestrator};
use ntnctl_storage::repo::{KpiHistoryRepo, NtnStatusRepo};
use ntnctl_storage::sqlite::SqliteStore;
use ntnctl_storage::{NtnRepo, NtnStore, StorageError};
use tonic::transport::{Channel, Endpoint};

pub mod grpc_api {
    tonic::include_proto!("ntnctl.crisis.v1");
}

use grpc_api::crisis_service_client::CrisisServiceClient;

pub const SESSION_COOKIE_NAME: &str = "client_id";
pub const SESSION_COOKIE_MAX_AGE_SECS: u64 = 3_600;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid adapter configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error("grpc transport setup failed: {0}")]
    Transport(#[from] tonic::transport::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: String,
    pub grpc_addr: String,
    pub grpc_bind: String,
    pub db_path: Option<PathBuf>,
    pub lease_ttl_ms: u64,
    pub inference_timeout_ms: u64,
    pub cookie_secure: bool,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            http_bind: "127.0.0.1:8080".to_string(),
            grpc_addr: "http://127.0.0.1:50051".to_string(),
            grpc_bind: "127.0.0.1:50051".to_string(),
            db_path: None,
            lease_ttl_ms: 3_600_000,
            inference_timeout_ms: 5_000,
            cookie_secure: false,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            http_bind: env::var("NTNCTL_HTTP_BIND").unwrap_or(defaults.http_bind),
            grpc_addr: env::var("NTNCTL_GRPC_ADDR").unwrap_or(defaults.grpc_addr),
            grpc_bind: env::var("NTNCTL_GRPC_BIND").unwrap_or(defaults.grpc_bind),
            db_path: env::var("NTNCTL_DB_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            lease_ttl_ms: parse_lease_ttl_ms_from_env(),
            inference_timeout_ms: parse_inference_timeout_ms_from_env(),
            cookie_secure: parse_cookie_secure_from_env(),
        }
    }

    /// SQLite when a database path is configured, otherwise a fresh in-memory store.
    pub fn open_store(&self) -> Result<Arc<dyn NtnRepo>, AdapterError> {
        match &self.db_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening sqlite store");
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            None => {
                tracing::warn!("NTNCTL_DB_PATH unset; state is kept in memory only");
                Ok(Arc::new(NtnStore::new_in_memory()))
            }
        }
    }
}

fn parse_lease_ttl_ms_from_env() -> u64 {
    env::var("NTNCTL_LEASE_TTL_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (1..=86_400_000).contains(v))
        .unwrap_or(3_600_000)
}

fn parse_inference_timeout_ms_from_env() -> u64 {
    env::var("NTNCTL_INFERENCE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (1..=600_000).contains(v))
        .unwrap_or(5_000)
}

fn parse_cookie_secure_from_env() -> bool {
    match env::var("NTNCTL_COOKIE_SECURE") {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        Err(_) => false,
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Value of the session cookie in a `Cookie` request header, if any.
pub fn session_cookie_from_header(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn issue_session_cookie(identity: &ClientIdentity, secure: bool) -> String {
    session_cookie(identity.as_str(), SESSION_COOKIE_MAX_AGE_SECS, secure)
}

pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

fn session_cookie(value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Scores from the remote crisis model over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcCrisisScorer {
    client: CrisisServiceClient<Channel>,
    timeout: Duration,
}

impl GrpcCrisisScorer {
    /// Builds a lazily connecting channel. Must be called inside a tokio runtime.
    pub fn connect_lazy(addr: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let channel = Endpoint::from_shared(addr.to_string())?
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: CrisisServiceClient::new(channel),
            timeout,
        })
    }
}

#[tonic::async_trait]
impl CrisisScoringEngine for GrpcCrisisScorer {
    async fn evaluate(
        &self,
        req: CrisisScoreRequest,
    ) -> Result<CrisisScoreResponse, InferenceError> {
        let mut client = self.client.clone();
        let wire = grpc_api::CrisisRequest {
            seq_len: wire_dim("crisis_request.seq_len", req.seq_len)?,
            feature_dim: wire_dim("crisis_request.feature_dim", req.feature_dim)?,
            kpi_sequence: req.kpi_sequence,
        };
        match tokio::time::timeout(self.timeout, client.evaluate(wire)).await {
            Ok(Ok(resp)) => Ok(CrisisScoreResponse::v1(resp.into_inner().crisis_scores)),
            Ok(Err(status)) => Err(InferenceError::remote(
                status.code() as i32,
                status.message(),
            )),
            Err(_) => Err(InferenceError::remote(
                tonic::Code::DeadlineExceeded as i32,
                format!("no crisis score within {} ms", self.timeout.as_millis()),
            )),
        }
    }
}

fn wire_dim(field: &'static str, value: u32) -> Result<i32, InferenceError> {
    i32::try_from(value).map_err(|_| {
        InferenceError::InvalidRequest(ContractViolation::InvalidValue {
            field,
            reason: "exceeds int32 range",
        })
    })
}

/// Deterministic per-row score used by the local stub server: the mean of each row's
/// input channels (every column but the last), clamped to [0,1].
pub fn stub_crisis_scores(
    kpi_sequence: &[f32],
    seq_len: i32,
    feature_dim: i32,
) -> Result<Vec<f32>, &'static str> {
    let (Ok(seq_len), Ok(feature_dim)) = (usize::try_from(seq_len), usize::try_from(feature_dim))
    else {
        return Err("Input size mismatch");
    };
    if seq_len == 0 || feature_dim == 0 || kpi_sequence.len() != seq_len * feature_dim {
        return Err("Input size mismatch");
    }
    let inputs = feature_dim.saturating_sub(1).max(1);
    Ok(kpi_sequence
        .chunks_exact(feature_dim)
        .map(|row| {
            let mean = row[..inputs].iter().sum::<f32>() / inputs as f32;
            if mean.is_finite() {
                mean.clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NtnStatusView {
    pub state: u8,
    pub label: String,
    pub critical_count: u32,
    pub recovery_count: u32,
}

impl From<NtnStatus> for NtnStatusView {
    fn from(status: NtnStatus) -> Self {
        Self {
            state: status.state.as_u8(),
            label: status.state.label().to_string(),
            critical_count: status.critical_count,
            recovery_count: status.recovery_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryRowView {
    pub ts_ns: u64,
    #[serde(flatten)]
    pub kpis: KpiVector,
    pub crisis_score: f32,
    pub ntn_state: u8,
}

impl From<&KpiSample> for HistoryRowView {
    fn from(row: &KpiSample) -> Self {
        Self {
            ts_ns: row.ts.0,
            kpis: row.kpis,
            crisis_score: row.crisis_score,
            ntn_state: row.ntn_state.as_u8(),
        }
    }
}

impl HistoryRowView {
    fn into_sample(self) -> Result<KpiSample, ContractViolation> {
        Ok(KpiSample {
            ts: UnixTimeNs(self.ts_ns),
            kpis: self.kpis,
            crisis_score: self.crisis_score,
            ntn_state: NtnState::from_u8(self.ntn_state)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryResponse {
    pub rows: Vec<HistoryRowView>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionResponse {
    pub client_id: String,
    pub mode: String,
    pub ntn_status: NtnStatusView,
    pub history: Vec<HistoryRowView>,
}

/// Session payload plus the `Set-Cookie` value when a new identity was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub response: SessionResponse,
    pub set_cookie: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UpdateRequestBody {
    pub kpis: KpiVector,
    pub updated_kpi: String,
    #[serde(default)]
    pub history: Option<Vec<HistoryRowView>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UpdateResponse {
    pub status: String,
    pub crisis_score: f32,
    pub ntn_status: NtnStatusView,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReleaseResponse {
    pub ok: bool,
}

/// Release result plus the `Set-Cookie` value that drops the session, sent either way.
#[derive(Debug)]
pub struct ReleaseOutcome {
    pub result: Result<ReleaseResponse, AdapterError>,
    pub set_cookie: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ntn_status: Option<NtnStatusView>,
    pub history_rows: Option<usize>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApiErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ApiErrorResponse {
    pub fn from_update_error(err: &UpdateError) -> Self {
        Self {
            status: "error".to_string(),
            code: err.public_code().to_string(),
            message: err.public_message(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: "error".to_string(),
            code: "INTERNAL_ERROR".to_string(),
            message: ntnctl_os::update::GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

fn parse_identity(raw: Option<&str>) -> Option<ClientIdentity> {
    raw.and_then(|v| ClientIdentity::new(v).ok())
}

fn fresh_identity() -> Result<ClientIdentity, ContractViolation> {
    ClientIdentity::new(uuid::Uuid::new_v4().to_string())
}

/// Everything the HTTP surface needs, shared behind one `Arc`.
pub struct AdapterRuntime<E>
where
    E: CrisisScoringEngine,
{
    orchestrator: UpdateOrchestrator<dyn NtnRepo, E>,
    cookie_secure: bool,
}

impl<E> AdapterRuntime<E>
where
    E: CrisisScoringEngine,
{
    pub fn new(
        repo: Arc<dyn NtnRepo>,
        config: &AdapterConfig,
        engine: E,
    ) -> Result<Self, AdapterError> {
        let lease_config = LeaseConfig::from_ttl_ms(config.lease_ttl_ms)
            .map_err(|v| AdapterError::Config(v.to_string()))?;
        let policy = LeasePolicyRuntime::new(lease_config)?;
        Ok(Self {
            orchestrator: UpdateOrchestrator::new(repo, policy, NtnStateMachine::default(), engine),
            cookie_secure: config.cookie_secure,
        })
    }

    /// Page-load path. A missing or malformed cookie gets a fresh identity, which is
    /// then run through the lease check like any other.
    pub fn load_session(
        &self,
        cookie: Option<&str>,
        now: UnixTimeNs,
    ) -> Result<SessionOutcome, AdapterError> {
        let (identity, set_cookie) = match parse_identity(cookie) {
            Some(identity) => (identity, None),
            None => {
                let identity = fresh_identity()?;
                let cookie = issue_session_cookie(&identity, self.cookie_secure);
                tracing::debug!(client_id = %identity, "issued session identity");
                (identity, Some(cookie))
            }
        };
        let decision = self
            .orchestrator
            .lease_manager()
            .acquire_or_validate(Some(&identity), now)?;
        let repo = self.orchestrator.repo();
        Ok(SessionOutcome {
            response: SessionResponse {
                client_id: identity.as_str().to_string(),
                mode: decision.role.as_str().to_string(),
                ntn_status: repo.ntn_status_row()?.into(),
                history: self.history_report(now)?.rows,
            },
            set_cookie,
        })
    }

    /// Newest 60 history rows oldest first, zero-padded at the head for display.
    pub fn history_report(&self, now: UnixTimeNs) -> Result<HistoryResponse, AdapterError> {
        let rows = self.orchestrator.repo().recent_history_rows(KPI_SEQ_LEN)?;
        let rows = pad_history(rows, KPI_SEQ_LEN, now);
        Ok(HistoryResponse {
            rows: rows.iter().map(HistoryRowView::from).collect(),
        })
    }

    pub fn current_role(
        &self,
        cookie: Option<&str>,
        now: UnixTimeNs,
    ) -> Result<ControllerRole, AdapterError> {
        let identity = parse_identity(cookie);
        Ok(self
            .orchestrator
            .lease_manager()
            .current_role(identity.as_ref(), now)?)
    }

    pub async fn submit_update(
        &self,
        cookie: Option<&str>,
        body: UpdateRequestBody,
        now: UnixTimeNs,
    ) -> Result<UpdateResponse, UpdateError> {
        let history = body
            .history
            .map(|rows| {
                rows.into_iter()
                    .map(HistoryRowView::into_sample)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(UpdateError::InvalidRequest)?;
        let req = KpiUpdateRequest {
            identity: parse_identity(cookie),
            kpis: body.kpis,
            updated_kpi: body.updated_kpi,
            history,
        };
        let outcome = self.orchestrator.submit(req, now).await?;
        Ok(UpdateResponse {
            status: "ok".to_string(),
            crisis_score: outcome.crisis_score,
            ntn_status: outcome.ntn_status.into(),
        })
    }

    /// Frees the lease when the caller holds it. Idempotent. The session cookie is
    /// cleared even when the lease row could not be written.
    pub fn release(&self, cookie: Option<&str>) -> ReleaseOutcome {
        let result = match parse_identity(cookie) {
            Some(identity) => self
                .orchestrator
                .lease_manager()
                .release(&identity)
                .map(|_| ReleaseResponse { ok: true })
                .map_err(AdapterError::from),
            None => Ok(ReleaseResponse { ok: true }),
        };
        ReleaseOutcome {
            result,
            set_cookie: clear_session_cookie(self.cookie_secure),
        }
    }

    pub fn health_report(&self) -> HealthResponse {
        let repo = self.orchestrator.repo();
        let snapshot = repo
            .ntn_status_row()
            .and_then(|status| Ok((status, repo.history_row_count()?)));
        match snapshot {
            Ok((status, rows)) => HealthResponse {
                status: "ok".to_string(),
                ntn_status: Some(status.into()),
                history_rows: Some(rows),
                reason: None,
            },
            Err(err) => HealthResponse {
                status: "error".to_string(),
                ntn_status: None,
                history_rows: None,
                reason: Some(err.to_string()),
            },
        }
    }
}
