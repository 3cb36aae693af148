#![forbid(unsafe_code)]

pub mod repo;
pub mod sqlite;
pub mod store;

pub use repo::NtnRepo;
pub use store::{NtnStore, StorageError};
