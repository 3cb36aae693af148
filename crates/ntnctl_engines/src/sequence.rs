#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::kpi::{KpiSample, KpiVector, KPI_FEATURE_DIM};
use ntnctl_kernel_contracts::sequence::{FeatureRow, FeatureSequence, KPI_SEQ_LEN};
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};

/// Historical rows that precede the submitted sample in one window.
pub const HISTORY_TAIL_LEN: usize = KPI_SEQ_LEN - 1;

/// Crisis-score column value for the row being scored; the score is not known yet.
pub const PENDING_CRISIS_SCORE: f32 = 0.0;

#[derive(Debug, Clone, Default)]
pub struct SequenceBuilder;

impl SequenceBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the 60x8 window: the newest 59 history rows (ascending time), zero rows
    /// at the head when fewer exist, then the submitted sample with a pending score.
    pub fn build(
        &self,
        history_tail: &[KpiSample],
        current: &KpiVector,
    ) -> Result<FeatureSequence, ContractViolation> {
        current.validate()?;

        let tail_start = history_tail.len().saturating_sub(HISTORY_TAIL_LEN);
        let tail = &history_tail[tail_start..];
        let pad_count = HISTORY_TAIL_LEN - tail.len();

        let mut rows: Vec<FeatureRow> = Vec::with_capacity(KPI_SEQ_LEN);
        rows.extend(std::iter::repeat([0.0; KPI_FEATURE_DIM]).take(pad_count));
        rows.extend(tail.iter().map(KpiSample::feature_row));
        rows.push(current.feature_row(PENDING_CRISIS_SCORE));

        FeatureSequence::v1(rows)
    }
}

/// Left-pads an ascending history to `target_len` rows for display.
///
/// Pad rows carry zero values and the earliest real timestamp, or `now` when there
/// is no real row at all. Histories already at or above `target_len` keep their newest rows.
pub fn pad_history(
    mut rows: Vec<KpiSample>,
    target_len: usize,
    now: UnixTimeNs,
) -> Vec<KpiSample> {
    if rows.len() >= target_len {
        return rows.split_off(rows.len() - target_len);
    }
    let pad_ts = rows.first().map(|r| r.ts).unwrap_or(now);
    let mut padded = Vec::with_capacity(target_len);
    padded.extend(std::iter::repeat(KpiSample::padding(pad_ts)).take(target_len - rows.len()));
    padded.append(&mut rows);
    padded
}
