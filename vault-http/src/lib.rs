#![deny(missing_docs)]
//! HTTP transport for the multi-tenant signing vault.
//!
//! Exposes exactly the surface pinned by the external-interfaces contract:
//! `GET /jwks/{domain}` and `GET /health`. Everything else (signing,
//! rotation, admin provisioning) is out of scope for this transport; the
//! gRPC surface referenced by the design lives elsewhere.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;
use vault_core::KeyManager;

mod errors;
pub mod health;
pub mod jwks;

/// Builds the full HTTP router: JWKS publication plus the health probe,
/// wrapped in a request/response trace layer.
pub fn router(key_manager: Arc<KeyManager>) -> Router {
    Router::new()
        .merge(jwks::routes(key_manager))
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
}
