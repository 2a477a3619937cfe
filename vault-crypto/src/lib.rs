#![deny(missing_docs)]
//! RSA-4096/PKCS#8/RSASSA-PKCS1-v1.5-SHA256 crypto primitives for the vault.
//!
//! This crate is the vault's `CryptoEngine` capability: key generation,
//! PEM↔JWK conversion, signing, and the canonical SHA-256 hash used to key
//! garbage-collector idempotence. It knows nothing about domains, kids, or
//! the key-lifecycle state machine — those live in `vault-core`.

use base64::Engine as _;
use rand::rngs::OsRng;
use rsa::{
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
};
use sha2::{Digest, Sha256};
use vault_types::Jwk;
use zeroize::Zeroize as _;

/// Bit length of keys minted by [`RsaCryptoEngine::generate_keypair`].
pub const RSA_KEY_BITS: usize = 4096;

/// Errors a [`CryptoEngine`] implementation may return.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// RSA key generation failed (exhausted entropy, bad parameters, ...).
    #[error("key generation failed")]
    KeyGen,
    /// A PEM blob could not be parsed as PKCS#8/SPKI.
    #[error("invalid key encoding")]
    InvalidEncoding,
    /// Signing with an imported private key failed.
    #[error("signing failed")]
    SigningFailed,
}

/// A private key that has already been parsed out of PEM, ready to sign.
///
/// This is the "imported CryptoKey" referenced throughout the key-manager
/// design: expensive to produce, cheap to reuse, and invalidated wholesale
/// on rotation.
pub struct ImportedSigningKey(RsaPrivateKey);

/// A freshly generated RSA key pair, still in PEM form.
pub struct KeyPairPem {
    /// PKCS#8 PEM, mode 0600 on disk.
    pub private_pem: String,
    /// SPKI PEM, mode 0644 on disk.
    pub public_pem: String,
}

/// The vault's cryptographic capability: RSA keygen, PEM↔JWK conversion,
/// signing, and canonical hashing.
///
/// Implementations must not leak private-key material in error messages
/// (see `SigningFailedError` / `CryptoImportError` in the design).
pub trait CryptoEngine: Send + Sync {
    /// Generates a fresh RSA-4096 key pair, PKCS#8/SPKI PEM encoded.
    fn generate_keypair(&self) -> Result<KeyPairPem, CryptoError>;

    /// Parses a PKCS#8 private key PEM into an [`ImportedSigningKey`].
    fn import_private_key(&self, pem: &str) -> Result<ImportedSigningKey, CryptoError>;

    /// Signs `data` with an already-imported private key using
    /// RSASSA-PKCS1-v1.5/SHA-256. Returns the raw signature bytes.
    fn sign(&self, key: &ImportedSigningKey, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Converts an SPKI public key PEM into a JWK, tagging it with `kid`.
    fn pem_to_jwk(&self, public_pem: &str, kid: &str) -> Result<Jwk, CryptoError>;

    /// Computes the hex-encoded SHA-256 digest of `data`. Used for the
    /// canonical snapshot hash that makes garbage collection idempotent.
    fn hash(&self, data: &[u8]) -> String;
}

/// The production [`CryptoEngine`], backed by the `rsa` crate.
#[derive(Default, Clone, Copy)]
pub struct RsaCryptoEngine;

impl CryptoEngine for RsaCryptoEngine {
    fn generate_keypair(&self) -> Result<KeyPairPem, CryptoError> {
        let mut rng = OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|_| CryptoError::KeyGen)?;
        let public_key = RsaPublicKey::from(&private_key);

        let mut private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|_| CryptoError::KeyGen)?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| CryptoError::KeyGen)?;

        let result = KeyPairPem {
            private_pem: private_pem.clone(),
            public_pem,
        };
        private_pem.zeroize();
        Ok(result)
    }

    fn import_private_key(&self, pem: &str) -> Result<ImportedSigningKey, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| CryptoError::InvalidEncoding)?;
        Ok(ImportedSigningKey(key))
    }

    fn sign(&self, key: &ImportedSigningKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = Sha256::digest(data);
        key.0
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|_| CryptoError::SigningFailed)
    }

    fn pem_to_jwk(&self, public_pem: &str, kid: &str) -> Result<Jwk, CryptoError> {
        let public_key =
            RsaPublicKey::from_public_key_pem(public_pem).map_err(|_| CryptoError::InvalidEncoding)?;
        let n = base64url(&public_key.n().to_bytes_be());
        let e = base64url(&public_key.e().to_bytes_be());
        Ok(Jwk {
            kty: "RSA".to_owned(),
            use_: "sig".to_owned(),
            alg: "RS256".to_owned(),
            kid: kid.to_owned(),
            n,
            e,
        })
    }

    fn hash(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

fn base64url(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Minimal hex encoding helper, so the crate does not need a separate `hex`
/// dependency purely for the canonical hash.
mod hex {
    pub(crate) fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write as _;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_keygen_sign_verify_via_jwk() {
        let engine = RsaCryptoEngine;
        let pair = engine.generate_keypair().expect("keygen");
        let imported = engine.import_private_key(&pair.private_pem).expect("import");
        let signature = engine.sign(&imported, b"header.payload").expect("sign");

        let jwk = engine.pem_to_jwk(&pair.public_pem, "test-kid").expect("jwk");
        assert_eq!(jwk.kid, "test-kid");
        assert_eq!(jwk.alg, "RS256");

        // Reconstruct the public key from the JWK and verify independently
        // of the PEM path, matching the round-trip property in the design.
        let n = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&jwk.n)
            .unwrap();
        let e = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&jwk.e)
            .unwrap();
        let public_key = RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(&n),
            rsa::BigUint::from_bytes_be(&e),
        )
        .expect("reconstruct public key");
        let digest = Sha256::digest(b"header.payload");
        public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .expect("signature verifies");
    }

    #[test]
    fn hash_is_deterministic() {
        let engine = RsaCryptoEngine;
        assert_eq!(engine.hash(b"abc"), engine.hash(b"abc"));
        assert_ne!(engine.hash(b"abc"), engine.hash(b"abd"));
    }

    #[test]
    fn tampered_signature_does_not_verify() {
        let engine = RsaCryptoEngine;
        let pair = engine.generate_keypair().expect("keygen");
        let imported = engine.import_private_key(&pair.private_pem).expect("import");
        let mut signature = engine.sign(&imported, b"payload").expect("sign");
        signature[0] ^= 0xff;

        let public_key = RsaPublicKey::from_public_key_pem(&pair.public_pem).unwrap();
        let digest = Sha256::digest(b"payload");
        assert!(
            public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
                .is_err()
        );
    }
}
