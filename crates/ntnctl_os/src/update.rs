#![forbid(unsafe_code)]

use std::sync::Arc;

use ntnctl_engines::lease::LeasePolicyRuntime;
use ntnctl_engines::ntn::NtnStateMachine;
use ntnctl_engines::sequence::{SequenceBuilder, HISTORY_TAIL_LEN};
use ntnctl_kernel_contracts::kpi::{KpiChannel, KpiSample, KpiVector};
use ntnctl_kernel_contracts::lease::ClientIdentity;
use ntnctl_kernel_contracts::ntn::NtnStatus;
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};
use ntnctl_storage::{NtnRepo, StorageError};
use tokio::sync::Mutex;

use crate::inference::{CrisisScoringEngine, InferenceError, InferenceGateway};
use crate::lease::{ControllerLeaseManager, LeaseError};

pub const GENERIC_FAILURE_MESSAGE: &str = "A server-side error occurred.";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    #[error("no client identity presented")]
    Unauthorized,
    #[error("controller lease is held by another client")]
    Forbidden,
    #[error("invalid update request: {0}")]
    InvalidRequest(ContractViolation),
    #[error("crisis inference unavailable: {0}")]
    InferenceUnavailable(InferenceError),
    #[error("persistence failure: {0}")]
    PersistenceFailure(StorageError),
}

impl UpdateError {
    /// Caller-visible text. Inference and storage detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            UpdateError::Unauthorized => "Session expired".to_string(),
            UpdateError::Forbidden => "Read-only: another controller active".to_string(),
            UpdateError::InvalidRequest(v) => v.to_string(),
            UpdateError::InferenceUnavailable(_) | UpdateError::PersistenceFailure(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }

    pub fn public_code(&self) -> &'static str {
        match self {
            UpdateError::Unauthorized => "UNAUTHORIZED",
            UpdateError::Forbidden => "FORBIDDEN",
            UpdateError::InvalidRequest(_) => "INVALID_REQUEST",
            UpdateError::InferenceUnavailable(_) | UpdateError::PersistenceFailure(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

impl From<LeaseError> for UpdateError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Unauthorized => UpdateError::Unauthorized,
            LeaseError::Forbidden => UpdateError::Forbidden,
            LeaseError::Persistence(e) => persistence_failure(e),
        }
    }
}

impl From<StorageError> for UpdateError {
    fn from(err: StorageError) -> Self {
        persistence_failure(err)
    }
}

fn persistence_failure(err: StorageError) -> UpdateError {
    tracing::error!(error = %err, "kpi update aborted: storage failure");
    UpdateError::PersistenceFailure(err)
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiUpdateRequest {
    pub identity: Option<ClientIdentity>,
    pub kpis: KpiVector,
    /// Channel name as submitted; matched case-insensitively.
    pub updated_kpi: String,
    /// Prior window supplied by the caller, ascending. `None` reads it from history.
    pub history: Option<Vec<KpiSample>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KpiUpdateOutcome {
    pub channel: KpiChannel,
    pub channel_row_id: u64,
    pub crisis_score: f32,
    pub ntn_status: NtnStatus,
    pub sample: KpiSample,
}

pub struct UpdateOrchestrator<R, E>
where
    R: NtnRepo + ?Sized,
    E: CrisisScoringEngine,
{
    repo: Arc<R>,
    lease: ControllerLeaseManager<R>,
    builder: SequenceBuilder,
    gateway: InferenceGateway<E>,
    machine: NtnStateMachine,
    update_gate: Mutex<()>,
}

impl<R, E> UpdateOrchestrator<R, E>
where
    R: NtnRepo + ?Sized,
    E: CrisisScoringEngine,
{
    pub fn new(
        repo: Arc<R>,
        policy: LeasePolicyRuntime,
        machine: NtnStateMachine,
        engine: E,
    ) -> Self {
        Self {
            lease: ControllerLeaseManager::new(Arc::clone(&repo), policy),
            repo,
            builder: SequenceBuilder::new(),
            gateway: InferenceGateway::new(engine),
            machine,
            update_gate: Mutex::new(()),
        }
    }

    pub fn lease_manager(&self) -> &ControllerLeaseManager<R> {
        &self.lease
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    /// Applies one KPI update end to end. Updates run one at a time; any failure
    /// aborts the remaining steps. The channel value row is the only write that can
    /// precede a failed inference.
    pub async fn submit(
        &self,
        req: KpiUpdateRequest,
        now: UnixTimeNs,
    ) -> Result<KpiUpdateOutcome, UpdateError> {
        let _gate = self.update_gate.lock().await;

        let auth = self.lease.assert_writer(req.identity.as_ref(), now)?;
        let (channel, value) = validate_update(&req)?;

        let channel_row_id = self.repo.append_channel_value_row(channel, value, now)?;

        let history = match req.history {
            Some(rows) => rows,
            None => self.repo.recent_history_rows(HISTORY_TAIL_LEN)?,
        };
        let sequence = self
            .builder
            .build(&history, &req.kpis)
            .map_err(UpdateError::InvalidRequest)?;

        let crisis_score = match self.gateway.evaluate(&sequence).await {
            Ok(score) => score,
            Err(err) => {
                tracing::error!(
                    client_id = %auth.identity,
                    channel = channel.as_str(),
                    error = %err,
                    "kpi update aborted: crisis inference failed"
                );
                return Err(UpdateError::InferenceUnavailable(err));
            }
        };

        let prior = self.repo.ntn_status_row()?;
        let ntn_status = self.machine.step(prior, crisis_score);
        let sample = KpiSample::v1(now, req.kpis, crisis_score, ntn_status.state)
            .map_err(UpdateError::InvalidRequest)?;
        self.repo.commit_ntn_update_rows(ntn_status, sample)?;

        tracing::info!(
            channel = channel.as_str(),
            crisis_score,
            ntn_state = ntn_status.state.as_u8(),
            critical_count = ntn_status.critical_count,
            recovery_count = ntn_status.recovery_count,
            "kpi update applied"
        );
        Ok(KpiUpdateOutcome {
            channel,
            channel_row_id,
            crisis_score,
            ntn_status,
            sample,
        })
    }
}

fn validate_update(req: &KpiUpdateRequest) -> Result<(KpiChannel, f32), UpdateError> {
    let channel = KpiChannel::parse(&req.updated_kpi).map_err(UpdateError::InvalidRequest)?;
    req.kpis.validate().map_err(UpdateError::InvalidRequest)?;
    if let Some(rows) = &req.history {
        for row in rows {
            row.validate().map_err(UpdateError::InvalidRequest)?;
        }
    }
    let value = req
        .kpis
        .get(channel)
        .filter(|_| channel.is_submittable())
        .ok_or(UpdateError::InvalidRequest(ContractViolation::InvalidValue {
            field: "kpi_update.updated_kpi",
            reason: "crisis_score is derived and cannot be submitted",
        }))?;
    Ok((channel, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntnctl_engines::lease::LeaseConfig;
    use ntnctl_kernel_contracts::inference::{CrisisScoreRequest, CrisisScoreResponse};
    use ntnctl_kernel_contracts::ntn::NtnState;
    use ntnctl_kernel_contracts::sequence::KPI_SEQ_LEN;
    use ntnctl_storage::repo::{KpiHistoryRepo, NtnStatusRepo};
    use ntnctl_storage::NtnStore;
    use std::sync::Mutex as StdMutex;

    /// Returns a fixed last-row score, or a fixed remote error, and records each payload.
    struct StubEngine {
        reply: Result<f32, InferenceError>,
        seen: StdMutex<Vec<CrisisScoreRequest>>,
    }

    impl StubEngine {
        fn scoring(score: f32) -> Self {
            Self {
                reply: Ok(score),
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn failing(err: InferenceError) -> Self {
            Self {
                reply: Err(err),
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CrisisScoringEngine for StubEngine {
        async fn evaluate(
            &self,
            req: CrisisScoreRequest,
        ) -> Result<CrisisScoreResponse, InferenceError> {
            let rows = req.seq_len as usize;
            self.seen.lock().unwrap().push(req);
            // Give concurrent submits a chance to interleave.
            tokio::task::yield_now().await;
            self.reply
                .clone()
                .map(|score| CrisisScoreResponse::v1(vec![score; rows]))
        }
    }

    fn orchestrator(engine: StubEngine) -> UpdateOrchestrator<NtnStore, StubEngine> {
        UpdateOrchestrator::new(
            Arc::new(NtnStore::new_in_memory()),
            LeasePolicyRuntime::new(LeaseConfig::mvp_v1()).unwrap(),
            NtnStateMachine::default(),
            engine,
        )
    }

    fn id(v: &str) -> ClientIdentity {
        ClientIdentity::new(v).unwrap()
    }

    fn request(identity: Option<&str>, channel: &str) -> KpiUpdateRequest {
        KpiUpdateRequest {
            identity: identity.map(id),
            kpis: KpiVector::from_inputs([0.1; 7]),
            updated_kpi: channel.to_string(),
            history: None,
        }
    }

    fn assert_nothing_written(o: &UpdateOrchestrator<NtnStore, StubEngine>) {
        let repo = o.repo();
        assert_eq!(repo.history_row_count().unwrap(), 0);
        assert_eq!(repo.ntn_status_row().unwrap(), NtnStatus::initial());
        for channel in KpiChannel::ALL {
            assert!(repo.channel_value_rows(channel).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn at_update_01_three_critical_scores_enter_fallback() {
        let o = orchestrator(StubEngine::scoring(0.95));
        let mut outcomes = Vec::new();
        for t in 1..=3u64 {
            outcomes.push(
                o.submit(request(Some("client_a"), "congestion"), UnixTimeNs(t))
                    .await
                    .unwrap(),
            );
        }

        let expected = NtnStatus {
            state: NtnState::Fallback,
            critical_count: 3,
            recovery_count: 0,
        };
        assert_eq!(outcomes[2].ntn_status, expected);
        assert_eq!(o.repo().ntn_status_row().unwrap(), expected);

        let history = o.repo().recent_history_rows(KPI_SEQ_LEN).unwrap();
        let states: Vec<NtnState> = history.iter().map(|r| r.ntn_state).collect();
        assert_eq!(
            states,
            vec![NtnState::Elevated, NtnState::Elevated, NtnState::Fallback]
        );
        assert!(history.iter().all(|r| r.crisis_score == 0.95));
        assert_eq!(
            o.repo()
                .channel_value_rows(KpiChannel::Congestion)
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn at_update_02_missing_identity_is_unauthorized_and_writes_nothing() {
        let o = orchestrator(StubEngine::scoring(0.95));
        let err = o
            .submit(request(None, "congestion"), UnixTimeNs(1))
            .await
            .unwrap_err();
        assert_eq!(err, UpdateError::Unauthorized);
        assert_eq!(err.public_message(), "Session expired");
        assert_nothing_written(&o);
        assert!(o.gateway.engine().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn at_update_03_foreign_lease_is_forbidden() {
        let o = orchestrator(StubEngine::scoring(0.2));
        o.lease_manager()
            .acquire_or_validate(Some(&id("client_a")), UnixTimeNs(1))
            .unwrap();
        let err = o
            .submit(request(Some("client_b"), "congestion"), UnixTimeNs(2))
            .await
            .unwrap_err();
        assert_eq!(err, UpdateError::Forbidden);
        assert_eq!(err.public_message(), "Read-only: another controller active");
        assert_nothing_written(&o);
    }

    #[tokio::test]
    async fn at_update_04_inference_failure_stops_after_channel_write() {
        let o = orchestrator(StubEngine::failing(InferenceError::remote(14, "connection refused")));
        let err = o
            .submit(request(Some("client_a"), "prb_util"), UnixTimeNs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::InferenceUnavailable(_)));
        assert_eq!(err.public_message(), GENERIC_FAILURE_MESSAGE);
        assert_eq!(err.public_code(), "INTERNAL_ERROR");

        assert_eq!(o.repo().channel_value_rows(KpiChannel::PrbUtil).unwrap().len(), 1);
        assert_eq!(o.repo().history_row_count().unwrap(), 0);
        assert_eq!(o.repo().ntn_status_row().unwrap(), NtnStatus::initial());
    }

    #[tokio::test]
    async fn at_update_05_invalid_channel_rejected_before_any_write() {
        let o = orchestrator(StubEngine::scoring(0.2));
        for channel in ["latency", "crisis_score"] {
            let err = o
                .submit(request(Some("client_a"), channel), UnixTimeNs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, UpdateError::InvalidRequest(_)));
        }
        let mut bad = request(Some("client_a"), "congestion");
        bad.kpis.traffic_load = f32::NAN;
        assert!(matches!(
            o.submit(bad, UnixTimeNs(1)).await,
            Err(UpdateError::InvalidRequest(_))
        ));
        assert_eq!(o.repo().history_row_count().unwrap(), 0);
        assert!(o
            .repo()
            .channel_value_rows(KpiChannel::Congestion)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn at_update_06_window_comes_from_store_or_caller() {
        let o = orchestrator(StubEngine::scoring(0.3));
        o.submit(request(Some("client_a"), "Congestion"), UnixTimeNs(1))
            .await
            .unwrap();
        o.submit(request(Some("client_a"), "congestion"), UnixTimeNs(2))
            .await
            .unwrap();

        let mut supplied = request(Some("client_a"), "mobility_rate");
        let prior = KpiSample::v1(
            UnixTimeNs(0),
            KpiVector::from_inputs([0.5; 7]),
            0.7,
            NtnState::Degraded,
        )
        .unwrap();
        supplied.history = Some(vec![prior]);
        o.submit(supplied, UnixTimeNs(3)).await.unwrap();

        let seen = o.gateway.engine().seen.lock().unwrap();
        let row = |req: &CrisisScoreRequest, r: usize| req.kpi_sequence[r * 8..r * 8 + 8].to_vec();

        // Second call: first stored row, scored 0.3, sits just before the current row.
        assert_eq!(row(&seen[1], 57), vec![0.0; 8]);
        assert_eq!(row(&seen[1], 58), [vec![0.1f32; 7], vec![0.3]].concat());
        assert_eq!(row(&seen[1], 59), [vec![0.1f32; 7], vec![0.0]].concat());

        // Third call: the caller's window replaces the stored one.
        assert_eq!(row(&seen[2], 58), [vec![0.5f32; 7], vec![0.7]].concat());
        assert_eq!(row(&seen[2], 57), vec![0.0; 8]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_update_07_concurrent_submits_apply_one_at_a_time() {
        let o = Arc::new(orchestrator(StubEngine::scoring(0.95)));
        let tasks: Vec<_> = (1..=3u64)
            .map(|t| {
                let o = Arc::clone(&o);
                tokio::spawn(async move {
                    o.submit(request(Some("client_a"), "traffic_load"), UnixTimeNs(t))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(
            o.repo().ntn_status_row().unwrap(),
            NtnStatus {
                state: NtnState::Fallback,
                critical_count: 3,
                recovery_count: 0,
            }
        );
        assert_eq!(o.repo().history_row_count().unwrap(), 3);
        assert_eq!(
            o.repo()
                .channel_value_rows(KpiChannel::TrafficLoad)
                .unwrap()
                .len(),
            3
        );
    }
}
