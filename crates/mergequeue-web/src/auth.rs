//! Webhook authentication contract.
//!
//! Spec.md §1 places signature verification and the dashboards/badges system
//! out of scope. `WebhookAuth` fixes the shape of the check an inbound
//! webhook must pass without fixing the mechanism (HMAC secret, app JWT,
//! mTLS, …) — deployments supply their own implementation, the same way
//! `mergequeue-github` supplies the concrete side of `HostApi`.

use async_trait::async_trait;
use axum::http::HeaderMap;

#[async_trait]
pub trait WebhookAuth: Send + Sync {
    /// Returns `true` iff `body` is authorized to trigger the operation it
    /// describes, given the request's headers.
    async fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool;
}

/// Accepts everything. Intended for local development and for the
/// integration tests in this workspace; never construct this in a
/// deployment that receives webhooks from the public internet.
pub struct AllowAll;

#[async_trait]
impl WebhookAuth for AllowAll {
    async fn verify(&self, _headers: &HeaderMap, _body: &[u8]) -> bool {
        true
    }
}
