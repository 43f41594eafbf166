//! Crypto capability consumed by the engine.
//!
//! The engine only needs a handful of primitives: GUIDs for correlation ids,
//! base64url for `client_info` and ID token payloads, PKCE pairs, and random
//! strings for `state` and `nonce`. [`DefaultCrypto`] provides them with
//! `uuid`, `base64`, `oauth2` and `rand`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oauth2::PkceCodeChallenge;

use crate::error::ClientAuthError;

/// S256 is the only challenge method the engine generates.
pub const PKCE_METHOD_S256: &str = "S256";

/// A PKCE verifier and its derived challenge.
#[derive(Debug, Clone)]
pub struct PkceCodes {
    pub verifier: String,
    pub challenge: String,
}

/// Crypto primitives used by protocol clients and the response handler.
pub trait CryptoProvider: Send + Sync {
    /// A fresh random GUID (used as correlation id).
    fn create_new_guid(&self) -> String;

    /// Base64url-encode without padding.
    fn base64_encode(&self, input: &str) -> String;

    /// Decode base64url (padding optional) into a UTF-8 string.
    fn base64_decode(&self, input: &str) -> Result<String, ClientAuthError>;

    /// Generate a PKCE verifier/challenge pair using S256.
    fn generate_pkce_codes(&self) -> PkceCodes;

    /// A random alphanumeric string for `state` and `nonce` values.
    fn generate_random_string(&self, length: usize) -> String {
        generate_random_string(length)
    }
}

/// Default crypto implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrypto;

impl CryptoProvider for DefaultCrypto {
    fn create_new_guid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn base64_encode(&self, input: &str) -> String {
        URL_SAFE_NO_PAD.encode(input.as_bytes())
    }

    fn base64_decode(&self, input: &str) -> Result<String, ClientAuthError> {
        // Standard-alphabet input is accepted as well
        let normalized: String = input
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();

        let bytes = URL_SAFE_NO_PAD
            .decode(normalized.as_bytes())
            .map_err(|e| ClientAuthError::TokenParsing {
                message: format!("invalid base64: {}", e),
            })?;

        String::from_utf8(bytes).map_err(|e| ClientAuthError::TokenParsing {
            message: format!("decoded value is not UTF-8: {}", e),
        })
    }

    fn generate_pkce_codes(&self) -> PkceCodes {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        PkceCodes {
            verifier: verifier.secret().to_string(),
            challenge: challenge.as_str().to_string(),
        }
    }
}

/// Generate a random alphanumeric string of the specified length.
pub fn generate_random_string(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
