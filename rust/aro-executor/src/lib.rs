//! ARO Executor
//!
//! The side-effect plane. Core submits authorized commands over HTTP; the
//! Executor enforces the tenant boundary (auth, allow-lists, per-tenant
//! rate limit, permission manifest), executes each command at most once,
//! appends the canonical result event to a durable outbox, and only then
//! responds. The untrusted agent runtime behind it is reached through one
//! of two mutually exclusive modes: CLI subprocess or HTTP gateway.

pub mod admission;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod outbox;
pub mod runtime;
pub mod secrets;
pub mod server;
pub mod service;

pub use admission::AdmissionControl;
pub use config::{ExecutorConfig, RuntimeMode, ToolMapping};
pub use error::{ExecutorError, ExecutorResult};
pub use idempotency::IdempotencyStore;
pub use outbox::Outbox;
pub use runtime::{CliRuntime, GatewayRuntime, OpenclawRuntime};
pub use secrets::{EnvSecretProvider, SecretProvider};
pub use server::router;
pub use service::ExecutorService;
