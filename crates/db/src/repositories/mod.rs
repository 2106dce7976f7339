//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept a pool or an open transaction as the first argument.

pub mod operation_log_repo;

pub use operation_log_repo::OperationLogRepo;
