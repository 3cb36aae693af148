#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::inference::{CrisisScoreRequest, CrisisScoreResponse};
use ntnctl_kernel_contracts::sequence::FeatureSequence;
use ntnctl_kernel_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// Remote-reported or transport failure, with the gRPC status preserved.
    #[error("[gRPC {name} ({code})]: {message}")]
    Remote {
        code: i32,
        name: &'static str,
        message: String,
    },
    #[error("crisis score request rejected locally: {0}")]
    InvalidRequest(ContractViolation),
    #[error("crisis score response unusable: {0}")]
    InvalidResponse(ContractViolation),
}

impl InferenceError {
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        InferenceError::Remote {
            code,
            name: grpc_code_name(code),
            message: message.into(),
        }
    }
}

/// Canonical upper-case gRPC status name.
pub fn grpc_code_name(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "CANCELLED",
        2 => "UNKNOWN",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        6 => "ALREADY_EXISTS",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        11 => "OUT_OF_RANGE",
        12 => "UNIMPLEMENTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        15 => "DATA_LOSS",
        16 => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

/// Remote crisis scoring capability. Swapped for a deterministic stub in tests.
#[async_trait::async_trait]
pub trait CrisisScoringEngine: Send + Sync {
    async fn evaluate(
        &self,
        req: CrisisScoreRequest,
    ) -> Result<CrisisScoreResponse, InferenceError>;
}

#[derive(Debug, Clone)]
pub struct InferenceGateway<E>
where
    E: CrisisScoringEngine,
{
    engine: E,
}

impl<E> InferenceGateway<E>
where
    E: CrisisScoringEngine,
{
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Sends the flattened window with its declared shape and returns the score of the
    /// last row. Any failure is returned as-is; no score is ever made up locally.
    pub async fn evaluate(&self, sequence: &FeatureSequence) -> Result<f32, InferenceError> {
        let req =
            CrisisScoreRequest::from_sequence(sequence).map_err(InferenceError::InvalidRequest)?;
        let seq_len = req.seq_len;
        let resp = self.engine.evaluate(req).await?;
        resp.current_row_score(seq_len)
            .map_err(InferenceError::InvalidResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntnctl_kernel_contracts::kpi::KPI_FEATURE_DIM;
    use ntnctl_kernel_contracts::sequence::KPI_SEQ_LEN;
    use std::sync::Mutex;

    struct RecordingEngine {
        reply: Result<CrisisScoreResponse, InferenceError>,
        seen: Mutex<Vec<CrisisScoreRequest>>,
    }

    #[async_trait::async_trait]
    impl CrisisScoringEngine for RecordingEngine {
        async fn evaluate(
            &self,
            req: CrisisScoreRequest,
        ) -> Result<CrisisScoreResponse, InferenceError> {
            self.seen.lock().unwrap().push(req);
            self.reply.clone()
        }
    }

    fn gateway(reply: Result<CrisisScoreResponse, InferenceError>) -> InferenceGateway<RecordingEngine> {
        InferenceGateway::new(RecordingEngine {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn sequence() -> FeatureSequence {
        let rows = (0..KPI_SEQ_LEN)
            .map(|i| [i as f32; KPI_FEATURE_DIM])
            .collect();
        FeatureSequence::v1(rows).unwrap()
    }

    fn scores(last: f32) -> CrisisScoreResponse {
        let mut v = vec![0.1; KPI_SEQ_LEN];
        v[KPI_SEQ_LEN - 1] = last;
        CrisisScoreResponse::v1(v)
    }

    #[tokio::test]
    async fn at_gateway_01_sends_row_major_payload_with_declared_shape() {
        let g = gateway(Ok(scores(0.42)));
        assert_eq!(g.evaluate(&sequence()).await.unwrap(), 0.42);

        let seen = g.engine().seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.seq_len, 60);
        assert_eq!(req.feature_dim, 8);
        assert_eq!(req.kpi_sequence.len(), 480);
        assert_eq!(req.kpi_sequence[8], 1.0);
        assert_eq!(req.kpi_sequence[479], 59.0);
    }

    #[tokio::test]
    async fn at_gateway_02_remote_failure_propagates_with_status() {
        let g = gateway(Err(InferenceError::remote(14, "connection refused")));
        let err = g.evaluate(&sequence()).await.unwrap_err();
        assert_eq!(err.to_string(), "[gRPC UNAVAILABLE (14)]: connection refused");
    }

    #[tokio::test]
    async fn at_gateway_03_short_or_non_finite_responses_are_failures() {
        let short = gateway(Ok(CrisisScoreResponse::v1(vec![0.5])));
        assert!(matches!(
            short.evaluate(&sequence()).await,
            Err(InferenceError::InvalidResponse(_))
        ));
        let nan = gateway(Ok(scores(f32::NAN)));
        assert!(matches!(
            nan.evaluate(&sequence()).await,
            Err(InferenceError::InvalidResponse(_))
        ));
    }
}
