//! Trading pipeline library: signal generation, risk validation, order
//! execution, an immutable audit trail, and an LLM-backed advisory service.
//!
//! Only the standalone modules are exported here; `api` and `auth` depend on
//! `AppState`, which lives in `main.rs` and is assembled at the binary's
//! composition root, not in this library.

pub mod advisory;
pub mod audit;
pub mod broker;
pub mod config;
pub mod domain;
pub mod execution;
pub mod risk;
pub mod strategy;
