// Authentication types

use serde::{Deserialize, Serialize};
use std::fmt;

/// The current access/refresh token pair
///
/// Always replaced as a whole; a store never holds one token without the other.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never end up in logs through Debug
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Short prefix of a token, safe for logging
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}...", prefix)
}

/// Refresh endpoint request body
#[derive(Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body returned by the refresh and login endpoints
#[derive(Deserialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPairResponse> for CredentialPair {
    fn from(response: TokenPairResponse) -> Self {
        CredentialPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        }
    }
}

/// Login endpoint request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}
