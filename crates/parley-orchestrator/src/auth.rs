//! Caller authentication and candidate lookup.
//!
//! Credentials are opaque bearer tokens. A [`CredentialValidator`] turns a
//! token into a candidate id; a [`CandidateDirectory`] decides whether a
//! candidate id is known.

use std::collections::HashSet;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use crate::config::{AuthConfig, AuthMode};
use crate::error::{ParleyError, Result};

/// Header carrying a raw token, for clients that cannot set `Authorization`.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

// ============================================================================
// Credential validation
// ============================================================================

/// Resolves a bearer token to the candidate it identifies.
pub trait CredentialValidator: Send + Sync {
    /// Returns the candidate id carried by `token`.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the token is not valid.
    fn validate(&self, token: &str) -> Result<String>;
}

/// Treats the token itself as the candidate id. For development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughValidator;

impl CredentialValidator for PassthroughValidator {
    fn validate(&self, token: &str) -> Result<String> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ParleyError::unauthorized("empty token"));
        }
        Ok(token.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Validates HS256 JSON Web Tokens and reads the `sub` (or `userId`) claim.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator").finish_non_exhaustive()
    }
}

impl JwtValidator {
    /// Creates a validator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Creates a validator whose secret is read from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the variable is unset or empty.
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(secret) if !secret.is_empty() => Ok(Self::new(secret.as_bytes())),
            _ => Err(ParleyError::config_validation(
                format!("auth.mode is 'jwt' but {var} is not set"),
                format!("Export {var} or set auth.mode to 'passthrough' in parley.json"),
            )),
        }
    }
}

impl CredentialValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token.trim(), &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "Rejected token");
            ParleyError::unauthorized("token is not valid")
        })?;
        data.claims
            .user_id
            .or(data.claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ParleyError::unauthorized("token carries no user id"))
    }
}

/// Builds the validator selected by the auth configuration.
///
/// # Errors
///
/// Returns `ConfigValidationError` if JWT mode is selected without a secret.
pub fn validator_from_config(config: &AuthConfig) -> Result<Box<dyn CredentialValidator>> {
    match config.mode {
        AuthMode::Passthrough => Ok(Box::new(PassthroughValidator)),
        AuthMode::Jwt => Ok(Box::new(JwtValidator::from_env(&config.jwt_secret_env)?)),
    }
}

/// Reads a token from `Authorization: Bearer <token>` or `x-auth-token`.
#[must_use]
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        });

    bearer
        .or_else(|| {
            headers
                .get(AUTH_TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Candidates
// ============================================================================

/// Answers whether a candidate id refers to a known candidate.
pub trait CandidateDirectory: Send + Sync {
    /// Returns `true` if the candidate exists.
    fn contains(&self, candidate_id: &str) -> bool;
}

/// Candidate directory backed by an optional allow-list.
///
/// Without a list every non-empty candidate id is known.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    allowed: Option<HashSet<String>>,
}

impl StaticDirectory {
    /// Creates a directory; `None` admits every candidate.
    #[must_use]
    pub fn new(candidates: Option<&[String]>) -> Self {
        Self {
            allowed: candidates.map(|list| list.iter().cloned().collect()),
        }
    }
}

impl CandidateDirectory for StaticDirectory {
    fn contains(&self, candidate_id: &str) -> bool {
        if candidate_id.trim().is_empty() {
            return false;
        }
        self.allowed
            .as_ref()
            .is_none_or(|allowed| allowed.contains(candidate_id))
    }
}
