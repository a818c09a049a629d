//! HTTP surface for the merge-train scheduler.
//!
//! Exposes a refresh webhook endpoint for the surrounding event-intake
//! system to call into, and a Prometheus metrics endpoint. Signature
//! verification of inbound webhooks is a deployment concern left as the
//! `WebhookAuth` contract — the same way `HostApi` is a contract that
//! `mergequeue-github` fills in concretely, nothing here fills this one in.

pub mod auth;
pub mod error;
pub mod metrics;
pub mod router;
pub mod state;
pub mod webhook;

pub use auth::WebhookAuth;
pub use error::WebError;
pub use metrics::MetricsCollector;
pub use router::build_router;
pub use state::AppState;
