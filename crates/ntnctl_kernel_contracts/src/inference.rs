#![forbid(unsafe_code)]

use crate::sequence::FeatureSequence;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const CRISIS_SCORE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Flattened window plus its declared shape, so the scorer can check shape without re-deriving it.
#[derive(Debug, Clone, PartialEq)]
pub struct CrisisScoreRequest {
    pub schema_version: SchemaVersion,
    pub kpi_sequence: Vec<f32>,
    pub seq_len: u32,
    pub feature_dim: u32,
}

impl CrisisScoreRequest {
    pub fn from_sequence(sequence: &FeatureSequence) -> Result<Self, ContractViolation> {
        let req = Self {
            schema_version: CRISIS_SCORE_CONTRACT_VERSION,
            kpi_sequence: sequence.flatten(),
            seq_len: sequence.seq_len() as u32,
            feature_dim: sequence.feature_dim() as u32,
        };
        req.validate()?;
        Ok(req)
    }
}

impl Validate for CrisisScoreRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CRISIS_SCORE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "crisis_score_request.schema_version",
                reason: "must match CRISIS_SCORE_CONTRACT_VERSION",
            });
        }
        if self.seq_len == 0 || self.feature_dim == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "crisis_score_request.seq_len",
                reason: "declared shape must be non-empty",
            });
        }
        let expected = self.seq_len as usize * self.feature_dim as usize;
        if self.kpi_sequence.len() != expected {
            return Err(ContractViolation::InvalidValue {
                field: "crisis_score_request.kpi_sequence",
                reason: "length must equal seq_len * feature_dim",
            });
        }
        Ok(())
    }
}

/// One score per input row, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct CrisisScoreResponse {
    pub crisis_scores: Vec<f32>,
}

impl CrisisScoreResponse {
    pub fn v1(crisis_scores: Vec<f32>) -> Self {
        Self { crisis_scores }
    }

    /// Score of the newest row, which is the sample being submitted.
    pub fn current_row_score(&self, seq_len: u32) -> Result<f32, ContractViolation> {
        if self.crisis_scores.len() != seq_len as usize {
            return Err(ContractViolation::InvalidValue {
                field: "crisis_score_response.crisis_scores",
                reason: "must contain one score per input row",
            });
        }
        let last = self
            .crisis_scores
            .last()
            .copied()
            .ok_or(ContractViolation::InvalidValue {
                field: "crisis_score_response.crisis_scores",
                reason: "must be non-empty",
            })?;
        if !last.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "crisis_score_response.crisis_scores",
            });
        }
        Ok(last)
    }
}
