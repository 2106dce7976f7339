//! Self-update and version-rollback orchestration for a deployed znas server.
//!
//! The pieces, leaves first:
//!
//! - [`store`] -- persisted repo config and runtime environment, `.env` rendering.
//! - [`repo`] -- the local working copy: clone, inspect, fetch, resolve remote head.
//! - [`task`] -- detached update/rollback workers with a typed handle.
//! - [`service`] -- the admin flows that sequence the above and write audit entries.
//!
//! Every external command goes through [`process::run_bounded`], so a hung
//! `git` or `docker` call ends as [`OpsError::Timeout`] instead of stalling
//! the request.

pub mod audit;
pub mod compose;
pub mod config;
pub mod error;
pub mod git;
pub mod locks;
pub mod process;
pub mod repo;
pub mod service;
pub mod store;
pub mod task;

pub use error::{OpsError, OpsResult};
pub use service::OpsService;
