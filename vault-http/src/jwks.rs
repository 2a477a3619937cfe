//! `GET /jwks/:domain` — the JWKS publication endpoint.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, header},
    routing::get,
};
use tower_http::set_header::SetResponseHeaderLayer;
use vault_core::KeyManager;
use vault_types::{Domain, Jwks};

use crate::errors::ApiError;

/// Builds a router serving `GET /jwks/{domain}`.
///
/// Responses carry `Cache-Control: public, max-age=300`, matching the
/// design's interface contract — JWKS consumers are expected to cache keys
/// for up to five minutes between fetches.
pub fn routes(key_manager: Arc<KeyManager>) -> Router {
    Router::new()
        .route("/jwks/{domain}", get(get_jwks))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=300"),
        ))
        .with_state(key_manager)
}

async fn get_jwks(
    State(key_manager): State<Arc<KeyManager>>,
    Path(domain): Path<String>,
) -> Result<Json<Jwks>, ApiError> {
    if domain.trim().is_empty() {
        return Err(vault_core::error::KeyManagerError::Validation("missing domain".to_owned()).into());
    }
    let jwks = key_manager.get_jwks(&Domain::new(domain)).await?;
    Ok(Json(jwks))
}
