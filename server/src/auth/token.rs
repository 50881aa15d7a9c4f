use super::AuthError;
use crate::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// What a token may be used for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// short lived, authenticates API calls
    Access,
    /// long lived, only exchanged for new access tokens
    Refresh,
}

/// Signed token payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// username the token was issued to
    pub sub: String,
    /// access or refresh
    pub kind: TokenKind,
    /// issued at, unix seconds
    pub iat: i64,
    /// expires at, unix seconds
    pub exp: i64,
}

/// Tokens handed out on login
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenPair {
    /// access token
    pub access: String,
    /// refresh token
    pub refresh: String,
}

/// Issues and verifies HMAC-SHA256 signed tokens
///
/// A token is `base64url(claims json) "." base64url(signature)`, where the
/// signature covers the encoded claims.
pub struct TokenIssuer {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Sign with `secret`; tokens of each kind live for the given duration
    pub fn new(secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Issue a new access and refresh token for `username`
    pub fn pair(&self, username: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue(username, TokenKind::Access)?,
            refresh: self.issue(username, TokenKind::Refresh)?,
        })
    }

    /// Issue a single token of `kind` for `username`
    pub fn issue(&self, username: &str, kind: TokenKind) -> Result<String> {
        self.issue_at(username, kind, Utc::now())
    }

    fn issue_at(&self, username: &str, kind: TokenKind, now: DateTime<Utc>) -> Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: username.to_owned(),
            kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        let payload = serde_json::to_vec(&claims).map_err(|e| Error::Internal(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = self
            .mac()
            .map_err(|_| Error::Internal("invalid signing key".to_owned()))?
            .chain_update(payload.as_bytes())
            .finalize()
            .into_bytes();

        Ok(format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Check the signature, kind and expiry of `token`
    pub fn verify(&self, token: &str, expected: TokenKind) -> std::result::Result<Claims, AuthError> {
        self.verify_at(token, expected, Utc::now())
    }

    fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> std::result::Result<Claims, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::InvalidToken)?;

        self.mac()
            .map_err(|_| AuthError::InvalidToken)?
            .chain_update(payload.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::InvalidToken)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)?;

        if claims.kind != expected || claims.exp <= now.timestamp() {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    fn mac(&self) -> std::result::Result<HmacSha256, hmac::digest::InvalidLength> {
        HmacSha256::new_from_slice(&self.secret)
    }
}
