//! Network side of token exchange.
//!
//! [`AuthClient`] is the seam the [`TokenManager`](super::TokenManager) talks
//! through. [`OidcAuthClient`] implements it against an OpenID Connect token
//! endpoint using the password and refresh-token grants.

use crate::config::AuthConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;

/// Longest response body kept in a [`AuthError::Rejected`]
const MAX_ERROR_BODY: usize = 512;

/// Username/password pair
///
/// The password is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account password
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token pair as declared by the server, before safety buffers are applied
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Bearer token
    pub access_token: String,
    /// Declared access-token lifetime in seconds
    pub expires_in: u64,
    /// Refresh token, if the server issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Declared refresh-token lifetime in seconds
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

/// Trait for obtaining token pairs
///
/// Implementations perform exactly one network exchange per call and never
/// cache; caching and locking belong to the token manager.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Full authentication with username/password
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError>;

    /// Exchange a refresh token for a new pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

/// OpenID Connect token endpoint client
#[derive(Clone, Debug)]
pub struct OidcAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl OidcAuthClient {
    /// Build a client from the auth section of the configuration
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
        })
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Transport(format!("timeout contacting {}", self.token_url))
                } else {
                    AuthError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AuthClient for OidcAuthClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError> {
        self.exchange(&[
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("username", credentials.username()),
            ("password", credentials.password()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        self.exchange(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
