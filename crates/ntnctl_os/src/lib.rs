#![forbid(unsafe_code)]

pub mod inference;
pub mod lease;
pub mod update;
