//! JSON Web Key / JWK Set wire shapes.

use serde::{Deserialize, Serialize};

/// A single RSA public key in JWK form, as served by the JWKS endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type; always `"RSA"` for this vault.
    pub kty: String,
    /// Intended use; always `"sig"`.
    #[serde(rename = "use")]
    pub use_: String,
    /// Algorithm; always `"RS256"`.
    pub alg: String,
    /// Key id, matching the `kid` used in signed JWT headers.
    pub kid: String,
    /// RSA modulus, base64url (no padding) encoded, big-endian.
    pub n: String,
    /// RSA public exponent, base64url (no padding) encoded, big-endian.
    pub e: String,
}

/// A JSON Web Key Set, the shape returned by `GET /jwks/:domain`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys currently trusted for verification.
    pub keys: Vec<Jwk>,
}
