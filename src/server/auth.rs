//! Signed URL authentication.
//!
//! URLs are signed with an HMAC-SHA256 over the path and the query
//! parameters other than `sig`:
//!
//! ```text
//! signature = HMAC-SHA256(secret_key, "{path}?{canonical_query}")
//! ```
//!
//! The canonical query sorts the parameters and always includes `exp`, the
//! Unix time after which the signature is rejected:
//!
//! ```text
//! /iiif/3/cats.tif/full/max/0/default.jpg?exp=1735689600&sig=abc123...
//! ```
//!
//! Signatures are compared in constant time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{OriginalUri, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::handlers::ErrorResponse;

// =============================================================================
// Types
// =============================================================================

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingSignature,
    MissingExpiry,
    Expired { expired_at: u64, current_time: u64 },
    InvalidSignature,

    /// Signature is not valid hex, or appears twice
    InvalidSignatureFormat,

    /// Expiry is not an integer, or appears twice
    InvalidExpiryFormat,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingSignature => write!(f, "Missing signature parameter"),
            AuthError::MissingExpiry => write!(f, "Missing expiry parameter"),
            AuthError::Expired {
                expired_at,
                current_time,
            } => write!(
                f,
                "Signature expired at {} (current time: {})",
                expired_at, current_time
            ),
            AuthError::InvalidSignature => write!(f, "Invalid signature"),
            AuthError::InvalidSignatureFormat => write!(f, "Invalid signature format"),
            AuthError::InvalidExpiryFormat => write!(f, "Invalid expiry format"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "missing_signature"),
            AuthError::MissingExpiry => (StatusCode::UNAUTHORIZED, "missing_expiry"),
            AuthError::Expired { .. } => (StatusCode::UNAUTHORIZED, "signature_expired"),
            AuthError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "invalid_signature_format")
            }
            AuthError::InvalidExpiryFormat => (StatusCode::BAD_REQUEST, "invalid_expiry_format"),
        };
        let message = self.to_string();

        // A wrong signature may be probing; everything else is routine
        if self == AuthError::InvalidSignature {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        } else {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication failed: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Signed URL Authentication
// =============================================================================

/// Signed URL authenticator using HMAC-SHA256.
#[derive(Clone)]
pub struct SignedUrlAuth {
    mac: HmacSha256,
}

impl std::fmt::Debug for SignedUrlAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlAuth").finish_non_exhaustive()
    }
}

impl SignedUrlAuth {
    /// Create an authenticator keyed with `secret_key`.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Result<Self, hmac::digest::InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret_key.as_ref())?,
        })
    }

    /// Sign `path` for `ttl` from now.
    ///
    /// Returns the hex-encoded signature and the expiry timestamp.
    pub fn sign(&self, path: &str, ttl: Duration) -> (String, u64) {
        self.sign_with_params(path, ttl, &[])
    }

    /// Sign `path` together with extra query parameters.
    ///
    /// `params` should exclude `exp` and `sig`; those are added automatically.
    pub fn sign_with_params(
        &self,
        path: &str,
        ttl: Duration,
        params: &[(&str, &str)],
    ) -> (String, u64) {
        let expiry = now() + ttl.as_secs();
        (self.compute_signature(path, expiry, params), expiry)
    }

    /// Sign `path` with a fixed expiry timestamp.
    pub fn sign_with_expiry(&self, path: &str, expiry: u64) -> String {
        self.compute_signature(path, expiry, &[])
    }

    /// Check `signature` for `path`, `expiry` and the remaining parameters.
    pub fn verify(
        &self,
        path: &str,
        signature: &str,
        expiry: u64,
        params: &[(&str, &str)],
    ) -> Result<(), AuthError> {
        let current_time = now();
        if current_time > expiry {
            return Err(AuthError::Expired {
                expired_at: expiry,
                current_time,
            });
        }

        let provided = hex::decode(signature).map_err(|_| AuthError::InvalidSignatureFormat)?;
        let expected = self.mac_for(path, expiry, params).finalize().into_bytes();

        if provided.ct_eq(expected.as_slice()).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    /// `{base_url}{path}?...&exp=...&sig=...` valid for `ttl`.
    pub fn generate_signed_url(
        &self,
        base_url: &str,
        path: &str,
        ttl: Duration,
        extra_params: &[(&str, &str)],
    ) -> String {
        let (signature, expiry) = self.sign_with_params(path, ttl, extra_params);

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in extra_params {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("exp", &expiry.to_string());
        serializer.append_pair("sig", &signature);

        format!("{}{}?{}", base_url, path, serializer.finish())
    }

    fn compute_signature(&self, path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
        hex::encode(self.mac_for(path, expiry, params).finalize().into_bytes())
    }

    fn mac_for(&self, path: &str, expiry: u64, params: &[(&str, &str)]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(signature_base(path, expiry, params).as_bytes());
        mac
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn signature_base(path: &str, expiry: u64, params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    pairs.push(("exp".to_string(), expiry.to_string()));
    pairs.sort();

    let query = pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Reject requests without a valid `exp` + `sig` pair with 401.
pub async fn auth_middleware(
    State(auth): State<SignedUrlAuth>,
    OriginalUri(original_uri): OriginalUri,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let query = original_uri.query().unwrap_or("");

    let mut signature: Option<String> = None;
    let mut expiry: Option<u64> = None;
    let mut extra_params: Vec<(String, String)> = Vec::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "sig" => {
                if signature.replace(value.into_owned()).is_some() {
                    return Err(AuthError::InvalidSignatureFormat);
                }
            }
            "exp" => {
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| AuthError::InvalidExpiryFormat)?;
                if expiry.replace(parsed).is_some() {
                    return Err(AuthError::InvalidExpiryFormat);
                }
            }
            _ => extra_params.push((key.into_owned(), value.into_owned())),
        }
    }

    let signature = signature.ok_or(AuthError::MissingSignature)?;
    let expiry = expiry.ok_or(AuthError::MissingExpiry)?;
    let params: Vec<(&str, &str)> = extra_params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    auth.verify(original_uri.path(), &signature, expiry, &params)?;

    Ok(next.run(request).await)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/iiif/3/cats.tif/full/max/0/default.jpg";

    fn auth(key: &str) -> SignedUrlAuth {
        SignedUrlAuth::new(key).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let auth = auth("test-secret-key");
        let (signature, expiry) = auth.sign(PATH, Duration::from_secs(3600));
        assert!(auth.verify(PATH, &signature, expiry, &[]).is_ok());
    }

    #[test]
    fn test_verify_wrong_signature() {
        let auth = auth("test-secret-key");
        let (_, expiry) = auth.sign(PATH, Duration::from_secs(3600));
        let result = auth.verify(PATH, &"0".repeat(64), expiry, &[]);
        assert_eq!(result, Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_signature_bound_to_path() {
        let auth = auth("test-secret-key");
        let (signature, expiry) = auth.sign(PATH, Duration::from_secs(3600));
        let other = "/iiif/3/dogs.tif/full/max/0/default.jpg";
        assert_eq!(
            auth.verify(other, &signature, expiry, &[]),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_bound_to_params() {
        let auth = auth("test-secret-key");
        let (signature, expiry) =
            auth.sign_with_params(PATH, Duration::from_secs(3600), &[("token", "a")]);
        assert!(auth.verify(PATH, &signature, expiry, &[("token", "a")]).is_ok());
        assert!(auth.verify(PATH, &signature, expiry, &[("token", "b")]).is_err());
    }

    #[test]
    fn test_verify_expired() {
        let auth = auth("test-secret-key");
        let expired = now() - 100;
        let signature = auth.sign_with_expiry(PATH, expired);
        assert!(matches!(
            auth.verify(PATH, &signature, expired, &[]),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn test_verify_invalid_hex() {
        let auth = auth("test-secret-key");
        let result = auth.verify(PATH, "not-valid-hex!", now() + 3600, &[]);
        assert_eq!(result, Err(AuthError::InvalidSignatureFormat));
    }

    #[test]
    fn test_keys_are_independent() {
        let (a, b) = (auth("key1"), auth("key2"));
        let expiry = now() + 3600;
        let sig_a = a.sign_with_expiry(PATH, expiry);
        let sig_b = b.sign_with_expiry(PATH, expiry);
        assert_ne!(sig_a, sig_b);
        assert!(a.verify(PATH, &sig_b, expiry, &[]).is_err());
        assert!(b.verify(PATH, &sig_b, expiry, &[]).is_ok());
    }

    #[test]
    fn test_generate_signed_url() {
        let auth = auth("test-secret-key");
        let url = auth.generate_signed_url(
            "https://example.com",
            PATH,
            Duration::from_secs(3600),
            &[],
        );
        assert!(url.starts_with("https://example.com/iiif/3/cats.tif/full/max/0/default.jpg?exp="));
        assert!(url.contains("&sig="));
    }
}
