#![forbid(unsafe_code)]

use crate::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NtnState {
    Nominal,
    Degraded,
    Elevated,
    Fallback,
}

impl NtnState {
    pub fn as_u8(self) -> u8 {
        match self {
            NtnState::Nominal => 0,
            NtnState::Degraded => 1,
            NtnState::Elevated => 2,
            NtnState::Fallback => 3,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ContractViolation> {
        match value {
            0 => Ok(NtnState::Nominal),
            1 => Ok(NtnState::Degraded),
            2 => Ok(NtnState::Elevated),
            3 => Ok(NtnState::Fallback),
            _ => Err(ContractViolation::InvalidValue {
                field: "ntn_state",
                reason: "must be within 0..=3",
            }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NtnState::Nominal => "No NTN",
            NtnState::Degraded => "NTN Start",
            NtnState::Elevated => "NTN Cross",
            NtnState::Fallback => "Full Fallback",
        }
    }

    pub fn is_fallback(self) -> bool {
        self == NtnState::Fallback
    }
}

/// Singleton NTN status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtnStatus {
    pub state: NtnState,
    pub critical_count: u32,
    pub recovery_count: u32,
}

impl NtnStatus {
    pub fn initial() -> Self {
        Self {
            state: NtnState::Nominal,
            critical_count: 0,
            recovery_count: 0,
        }
    }
}

impl Default for NtnStatus {
    fn default() -> Self {
        Self::initial()
    }
}
