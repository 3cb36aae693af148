#![forbid(unsafe_code)]

use crate::kpi::KPI_FEATURE_DIM;
use crate::{ContractViolation, Validate};

/// Rows per inference window.
pub const KPI_SEQ_LEN: usize = 60;

pub type FeatureRow = [f32; KPI_FEATURE_DIM];

/// Fixed 60x8 model input. Built per inference call and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    rows: Vec<FeatureRow>,
}

impl FeatureSequence {
    pub fn v1(rows: Vec<FeatureRow>) -> Result<Self, ContractViolation> {
        let sequence = Self { rows };
        sequence.validate()?;
        Ok(sequence)
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn seq_len(&self) -> usize {
        self.rows.len()
    }

    pub fn feature_dim(&self) -> usize {
        KPI_FEATURE_DIM
    }

    pub fn last_row(&self) -> &FeatureRow {
        // v1 guarantees KPI_SEQ_LEN rows.
        &self.rows[self.rows.len() - 1]
    }

    /// Row-major flattening, the wire layout of the inference request.
    pub fn flatten(&self) -> Vec<f32> {
        self.rows.iter().flat_map(|row| row.iter().copied()).collect()
    }
}

impl Validate for FeatureSequence {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.rows.len() != KPI_SEQ_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "feature_sequence.rows",
                reason: "must contain exactly KPI_SEQ_LEN rows",
            });
        }
        if self.rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ContractViolation::NotFinite {
                field: "feature_sequence.rows",
            });
        }
        Ok(())
    }
}
