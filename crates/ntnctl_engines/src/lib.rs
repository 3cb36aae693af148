#![forbid(unsafe_code)]

pub mod lease;
pub mod ntn;
pub mod sequence;
