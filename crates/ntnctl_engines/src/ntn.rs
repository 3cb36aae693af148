#![forbid(unsafe_code)]

use ntnctl_kernel_contracts::ntn::{NtnState, NtnStatus};
use ntnctl_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NtnConfig {
    pub ntn_start: f32,
    pub ntn_cross: f32,
    pub critical_threshold: f32,
    pub critical_sustain_steps: u32,
    pub recovery_sustain_steps: u32,
}

impl NtnConfig {
    pub fn mvp_v1() -> Self {
        Self {
            ntn_start: 0.6,
            ntn_cross: 0.8,
            critical_threshold: 0.9,
            critical_sustain_steps: 3,
            recovery_sustain_steps: 2,
        }
    }
}

impl Validate for NtnConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value) in [
            ("ntn_config.ntn_start", self.ntn_start),
            ("ntn_config.ntn_cross", self.ntn_cross),
            ("ntn_config.critical_threshold", self.critical_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ContractViolation::InvalidRange {
                    field,
                    min: 0.0,
                    max: 1.0,
                    got: f64::from(value),
                });
            }
        }
        if !(self.ntn_start < self.ntn_cross && self.ntn_cross <= self.critical_threshold) {
            return Err(ContractViolation::InvalidValue {
                field: "ntn_config.ntn_cross",
                reason: "thresholds must satisfy ntn_start < ntn_cross <= critical_threshold",
            });
        }
        if self.critical_sustain_steps == 0 || self.recovery_sustain_steps == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ntn_config.critical_sustain_steps",
                reason: "sustain steps must be >= 1",
            });
        }
        Ok(())
    }
}

/// Hysteresis machine turning a noisy crisis score into a discrete NTN state.
///
/// Entering Fallback needs `critical_sustain_steps` consecutive scores at or above
/// `critical_threshold`; leaving it needs `recovery_sustain_steps` consecutive scores
/// below `ntn_cross`. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct NtnStateMachine {
    config: NtnConfig,
}

impl NtnStateMachine {
    pub fn new(config: NtnConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NtnConfig {
        &self.config
    }

    pub fn step(&self, status: NtnStatus, score: f32) -> NtnStatus {
        let cfg = &self.config;
        let NtnStatus {
            mut state,
            mut critical_count,
            mut recovery_count,
        } = status;

        if !state.is_fallback() {
            critical_count = if score >= cfg.critical_threshold {
                critical_count.saturating_add(1)
            } else {
                0
            };
            if critical_count >= cfg.critical_sustain_steps {
                state = NtnState::Fallback;
                recovery_count = 0;
            } else {
                state = self.graded_state(score);
            }
        } else {
            recovery_count = if score < cfg.ntn_cross {
                recovery_count.saturating_add(1)
            } else {
                0
            };
            if recovery_count >= cfg.recovery_sustain_steps {
                state = if score >= cfg.ntn_start {
                    NtnState::Degraded
                } else {
                    NtnState::Nominal
                };
                critical_count = 0;
            }
        }

        NtnStatus {
            state,
            critical_count,
            recovery_count,
        }
    }

    /// Folds a whole score series from the initial status; one state per score.
    pub fn run_series(&self, scores: &[f32]) -> Vec<NtnState> {
        scores
            .iter()
            .scan(NtnStatus::initial(), |status, &score| {
                *status = self.step(*status, score);
                Some(status.state)
            })
            .collect()
    }

    fn graded_state(&self, score: f32) -> NtnState {
        if score >= self.config.ntn_cross {
            NtnState::Elevated
        } else if score >= self.config.ntn_start {
            NtnState::Degraded
        } else {
            NtnState::Nominal
        }
    }
}

impl Default for NtnStateMachine {
    fn default() -> Self {
        Self {
            config: NtnConfig::mvp_v1(),
        }
    }
}
