#![forbid(unsafe_code)]

pub mod common;
pub mod inference;
pub mod kpi;
pub mod lease;
pub mod ntn;
pub mod sequence;

pub use common::{ContractViolation, UnixTimeNs, ReasonCodeId, SchemaVersion, Validate};
