//! Bearer token issuance and verification.
//!
//! Clients trade the shared API key for a short-lived token of the form
//! `v1.<expires_unix>.<nonce>.<hex hmac-sha256>`. Tokens are stateless: any
//! instance holding the same secret can verify them.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::shared_state::AppState;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

pub struct TokenAuthority {
    api_key_hash: Vec<u8>,
    secret: Vec<u8>,
    ttl: chrono::Duration,
}

impl TokenAuthority {
    pub fn new(api_key: &str, secret: &str, ttl: chrono::Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(ChatError::Config("API key must not be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(ChatError::Config("token secret must not be empty".to_string()));
        }
        if ttl <= chrono::Duration::zero() {
            return Err(ChatError::Config("token lifetime must be positive".to_string()));
        }
        Ok(Self {
            api_key_hash: Sha256::digest(api_key.as_bytes()).to_vec(),
            secret: secret.as_bytes().to_vec(),
            ttl,
        })
    }

    /// Exchange the API key for a fresh token.
    pub fn issue(&self, api_key: &str) -> Result<IssuedToken> {
        self.issue_at(api_key, Utc::now())
    }

    fn issue_at(&self, api_key: &str, now: DateTime<Utc>) -> Result<IssuedToken> {
        // Compare fixed-length digests so the key length does not leak.
        let provided = Sha256::digest(api_key.as_bytes());
        if !bool::from(provided.as_slice().ct_eq(self.api_key_hash.as_slice())) {
            return Err(ChatError::Auth("invalid API key".to_string()));
        }

        let expires_at = now + self.ttl;
        let nonce = Uuid::new_v4().simple().to_string();
        let payload = format!("{}.{}.{}", TOKEN_VERSION, expires_at.timestamp(), nonce);
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());

        Ok(IssuedToken {
            access_token: format!("{}.{}", payload, signature),
            token_type: "bearer",
            expires_at,
            expires_in: self.ttl.num_seconds(),
        })
    }

    pub fn verify(&self, token: &str) -> Result<()> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<()> {
        let invalid = || ChatError::Auth("invalid or expired token".to_string());

        let (payload, signature) = token.rsplit_once('.').ok_or_else(invalid)?;
        let mut parts = payload.splitn(3, '.');
        let (Some(version), Some(expires), Some(_nonce)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if version != TOKEN_VERSION {
            return Err(invalid());
        }

        let signature = hex::decode(signature).map_err(|_| invalid())?;
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;

        let expires: i64 = expires.parse().map_err(|_| invalid())?;
        if now.timestamp() >= expires {
            debug!(expired_at = expires, "rejected expired token");
            return Err(invalid());
        }
        Ok(())
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ChatError::Config(format!("invalid token secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

/// Rejects requests without a valid bearer token. Attach with
/// `axum::middleware::from_fn_with_state`.
pub async fn require_bearer(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() {
        return ChatError::Auth("missing bearer token".to_string()).into_response();
    }
    if let Err(e) = state.tokens.verify(token) {
        return e.into_response();
    }
    next.run(req).await
}
