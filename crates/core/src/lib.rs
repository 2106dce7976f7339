//! Domain types and pure logic shared by the znas backend crates.
//!
//! Nothing in this crate performs IO; the `ops` and `api` crates layer
//! process execution, persistence and HTTP on top of it.

pub mod audit;
pub mod error;
pub mod hashing;
pub mod roles;
pub mod runtime_env;
pub mod types;
pub mod version;
