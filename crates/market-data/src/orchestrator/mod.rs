//! Fetch orchestration.
//!
//! The [`Orchestrator`] fans one logical request out to every configured
//! venue concurrently and gathers one [`FetchResult`] per venue:
//! - venue calls run under retry, circuit breaking and a per-call timeout
//! - successful payloads pass through the [`RecordValidator`]
//! - liquidation streams run as one task per venue

mod operation;
mod result;
mod service;
mod validator;

pub use operation::FetchOperation;
pub use result::FetchResult;
pub use service::{Orchestrator, OrchestratorConfig, StreamOutcome, DEFAULT_CALL_TIMEOUT};
pub use validator::{
    RecordValidator, ValidationIssue, ValidationSeverity, ValidatorConfig,
};
