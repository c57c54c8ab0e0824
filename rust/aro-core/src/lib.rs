//! ARO Core Engine
//!
//! Deterministic authority for appointment-lifecycle automation. Ingests
//! booking and inbound-reply webhooks, advances workflow state machines,
//! appends the canonical event stream, and dispatches side-effecting work
//! to the Executor through a durable command queue. Core itself performs
//! no side effect: everything outbound goes through an authorized
//! Executor call, guarded by consent, caps, and guardrails.

pub mod audit;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod guardrails;
pub mod http;
pub mod risk;
pub mod triggers;

pub use audit::{AuditChain, AuditEntry, ChainVerification};
pub use config::CoreConfig;
pub use dispatch::{DispatchWorker, ExecutorDispatch, HttpExecutorClient};
pub use engine::CoreEngine;
pub use error::{CoreError, CoreResult};
pub use risk::{risk_profile, RiskProfile};
