//! Bearer token authentication.
//!
//! Every key-value operation takes a [`Principal`], and the only way to get
//! one is through an [`Authenticator`].

mod token;
pub mod users;

use crate::{Error, Result};
use log::warn;
use std::{fmt, sync::Arc};
use thiserror::Error;

pub use token::{Claims, TokenIssuer, TokenKind, TokenPair};
pub use users::{RegisterRequest, User, UserDirectory, UserProfile};

/// Only `Authorization: Bearer <token>` is understood
pub const AUTH_SCHEME: &str = "Bearer";

/// A verified caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    username: String,
}

impl Principal {
    /// Mint a principal. Call this only after the credential has been verified.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    /// The authenticated username
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.username)
    }
}

/// Reasons a credential is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header, or a scheme other than `Bearer`
    #[error("Authentication credentials were not provided.")]
    MissingCredentials,
    /// `Authorization: Bearer` without exactly one token
    #[error("Authorization header must contain two space-delimited values")]
    MalformedHeader,
    /// Bad signature, bad encoding, wrong token kind or expired
    #[error("Given token not valid for any token type")]
    InvalidToken,
    /// The token subject no longer exists
    #[error("User not found")]
    UnknownUser,
    /// The token subject has been deactivated
    #[error("User is inactive")]
    InactiveUser,
}

/// Turns the raw `Authorization` header of a request into a [`Principal`]
pub trait Authenticator: Send + Sync + 'static {
    /// Verify `authorization`, which is `None` when the header is absent
    fn authenticate(&self, authorization: Option<&str>) -> Result<Principal>;
}

/// Extract the token from an `Authorization` header value
pub fn bearer_token(authorization: Option<&str>) -> std::result::Result<&str, AuthError> {
    let header = authorization.ok_or(AuthError::MissingCredentials)?;
    let mut parts = header.split_whitespace();

    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme == AUTH_SCHEME => Ok(token),
        (Some(scheme), _, _) if scheme == AUTH_SCHEME => Err(AuthError::MalformedHeader),
        _ => Err(AuthError::MissingCredentials),
    }
}

/// Accepts unexpired access tokens whose subject is an active user
pub struct TokenAuthenticator {
    tokens: Arc<TokenIssuer>,
    users: Arc<UserDirectory>,
}

impl TokenAuthenticator {
    /// Verify tokens with `tokens` and look their subjects up in `users`
    pub fn new(tokens: Arc<TokenIssuer>, users: Arc<UserDirectory>) -> Self {
        Self { tokens, users }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, authorization: Option<&str>) -> Result<Principal> {
        let token = bearer_token(authorization)?;
        let claims = self.tokens.verify(token, TokenKind::Access).map_err(|e| {
            warn!("Rejected access token: {}", e);
            e
        })?;

        match self.users.find(&claims.sub)? {
            Some(user) if user.is_active => Ok(Principal::new(user.username)),
            Some(_) => Err(Error::Unauthenticated(AuthError::InactiveUser)),
            None => {
                warn!("Token subject {} does not exist", claims.sub);
                Err(Error::Unauthenticated(AuthError::UnknownUser))
            }
        }
    }
}
