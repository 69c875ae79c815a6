//! Identify-time collaborators
//!
//! Token verification and membership resolution sit behind traits so the
//! socket handlers can be exercised without a token issuer or the REST tier.

use async_trait::async_trait;
use gateway_common::{AppError, JwtService};
use gateway_protocol::Id;
use serde::Deserialize;
use std::collections::HashMap;

/// The authenticated principal behind a token
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user_id: Id,
    pub username: String,
}

/// Verifies Identify/Resume tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a token and return the user it belongs to
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AppError>;
}

/// JWT-backed verifier
///
/// Accepts the raw token or the `Bearer <token>` form clients tend to copy
/// out of HTTP headers.
pub struct JwtVerifier {
    jwt: JwtService,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, AppError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let claims = self.jwt.validate_access_token(token)?;

        if claims.is_expired() {
            return Err(AppError::TokenExpired);
        }

        Ok(VerifiedUser {
            user_id: claims.user_id()?,
            username: claims.name,
        })
    }
}

/// A user's subscription-relevant memberships
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Memberships {
    /// DM channels the user participates in
    pub channel_ids: Vec<Id>,
    /// Servers the user is a member of
    pub server_ids: Vec<Id>,
}

/// Resolves a user's memberships at Identify time
///
/// Called once per Identify; Resume reuses the stored snapshot and never
/// goes through this trait.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn resolve(&self, user_id: Id) -> Result<Memberships, AppError>;
}

/// Membership resolver backed by the internal REST tier
pub struct HttpMembershipResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMembershipResolver {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MembershipResolver for HttpMembershipResolver {
    async fn resolve(&self, user_id: Id) -> Result<Memberships, AppError> {
        let url = format!(
            "{}/internal/users/{}/memberships",
            self.base_url.trim_end_matches('/'),
            user_id
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "membership lookup returned {}",
                response.status()
            )));
        }

        response
            .json::<Memberships>()
            .await
            .map_err(|e| AppError::ExternalService(e.to_string()))
    }
}

/// Fixed membership table for tests and local development
#[derive(Debug, Default)]
pub struct StaticMembershipResolver {
    memberships: HashMap<Id, Memberships>,
}

impl StaticMembershipResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's memberships
    #[must_use]
    pub fn with_user(mut self, user_id: Id, channel_ids: Vec<Id>, server_ids: Vec<Id>) -> Self {
        self.memberships.insert(
            user_id,
            Memberships {
                channel_ids,
                server_ids,
            },
        );
        self
    }
}

#[async_trait]
impl MembershipResolver for StaticMembershipResolver {
    async fn resolve(&self, user_id: Id) -> Result<Memberships, AppError> {
        // Unknown users identify with empty subscriptions
        Ok(self.memberships.get(&user_id).cloned().unwrap_or_default())
    }
}
