//! ARO integration adapters
//!
//! One adapter per provider family. Each verifies webhook signatures over
//! the raw body, normalizes provider payloads into the small shapes Core
//! consumes, and routes outbound calls through the shared resilience
//! pipeline. Core never sees a raw provider schema.

pub mod calendly;
pub mod error;
pub mod outbound;
pub mod signature;
pub mod stripe;
pub mod twilio;

pub use calendly::{CalendlyAdapter, NormalizedBooking};
pub use error::{AdapterError, AdapterResult};
pub use outbound::ResilientSender;
pub use signature::{derive_idempotency_key, verify_hmac_sha256, WebhookVerifier};
pub use stripe::{NormalizedPaymentEvent, StripeAdapter};
pub use twilio::{NormalizedInboundMessage, TwilioAdapter};
