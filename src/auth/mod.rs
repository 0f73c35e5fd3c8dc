//! Bearer-token lifecycle.
//!
//! The [`TokenManager`] hands out access tokens that still have real life
//! left, trying in order:
//! 1. the cached access token,
//! 2. a refresh-token exchange,
//! 3. full username/password authentication.
//!
//! Every read and write of the [`TokenState`] happens under one async mutex
//! that is held across the network exchange, so concurrent callers observe a
//! consistent state and a genuine expiry triggers exactly one exchange.
//!
//! An optional background task renews the token on a fixed interval and
//! rewrites the bearer header file consumed by downstream HTTP readers.

mod client;
mod store;


pub use client::{AuthClient, Credentials, OidcAuthClient, TokenGrant};
pub use store::CredentialStore;

use crate::config::AuthConfig;
use crate::error::{AuthError, Error};
use crate::fetch::CredentialSupplier;
use crate::types::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Smallest margin kept between a reported access expiry and the real one
pub const MIN_ACCESS_BUFFER: Duration = Duration::from_secs(30);

/// Smallest margin kept between a reported refresh expiry and the real one
pub const MIN_REFRESH_BUFFER: Duration = Duration::from_secs(60);

/// Cached token pair with buffered expiries
///
/// Both expiry timestamps already have the safety buffer subtracted, so a
/// token reported valid here still has real remaining life downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// Bearer token
    pub access_token: String,
    /// Refresh token (empty when the server issued none)
    pub refresh_token: String,
    /// Buffered access-token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Buffered refresh-token expiry
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenState {
    /// Build a state from a server grant issued at `issued_at`
    ///
    /// When the grant carries no refresh token, the previous one (if any) is
    /// kept along with its expiry.
    pub fn from_grant(
        grant: TokenGrant,
        issued_at: DateTime<Utc>,
        access_buffer: Duration,
        refresh_buffer: Duration,
        previous: Option<&TokenState>,
    ) -> Self {
        let access_expires_at = buffered_expiry(issued_at, grant.expires_in, access_buffer);

        let (refresh_token, refresh_expires_at) = match grant.refresh_token {
            Some(token) => {
                let lifetime = grant.refresh_expires_in.unwrap_or(0);
                (token, buffered_expiry(issued_at, lifetime, refresh_buffer))
            }
            None => match previous {
                Some(prev) => (prev.refresh_token.clone(), prev.refresh_expires_at),
                None => (String::new(), issued_at),
            },
        };

        Self {
            access_token: grant.access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        }
    }

    /// Whether the access token is usable at `now`
    pub fn access_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.access_expires_at
    }

    /// Whether the refresh token is usable at `now`
    pub fn refresh_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.refresh_token.is_empty() && now < self.refresh_expires_at
    }
}

/// `issued_at + lifetime - buffer`, never earlier than `issued_at`
fn buffered_expiry(issued_at: DateTime<Utc>, lifetime_secs: u64, buffer: Duration) -> DateTime<Utc> {
    let usable = lifetime_secs.saturating_sub(buffer.as_secs());
    let usable = i64::try_from(usable).unwrap_or(i64::MAX / 2);
    chrono::Duration::try_seconds(usable)
        .and_then(|d| issued_at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Shared state behind every clone of a [`TokenManager`]
struct ManagerInner {
    client: Arc<dyn AuthClient>,
    credentials: Option<Credentials>,
    store: CredentialStore,
    state: Mutex<Option<TokenState>>,
    access_buffer: Duration,
    refresh_buffer: Duration,
    event_tx: broadcast::Sender<Event>,
    exchanges: AtomicU64,
}

impl ManagerInner {
    async fn get_token(&self) -> Result<String, AuthError> {
        let mut guard = self.state.lock().await;
        let cached = guard.clone();

        if let Some(state) = &cached {
            if state.access_valid_at(Utc::now()) {
                tracing::trace!("reusing cached access token");
                return Ok(state.access_token.clone());
            }

            if state.refresh_valid_at(Utc::now()) {
                let requested_at = Utc::now();
                self.exchanges.fetch_add(1, Ordering::Relaxed);
                match self.client.refresh(&state.refresh_token).await {
                    Ok(grant) => {
                        return self
                            .adopt(&mut guard, grant, requested_at, Some(state), "refresh")
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "refresh exchange failed, re-authenticating");
                    }
                }
            }
        }

        let Some(credentials) = &self.credentials else {
            return Err(AuthError::NoCredentials);
        };

        let requested_at = Utc::now();
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let grant = self
            .client
            .login(credentials)
            .await
            .map_err(|e| AuthError::Exhausted {
                source: Box::new(e),
            })?;

        self.adopt(&mut guard, grant, requested_at, cached.as_ref(), "password")
            .await
    }

    /// Install a fresh grant: buffer expiries, persist, publish the header
    async fn adopt(
        &self,
        guard: &mut Option<TokenState>,
        grant: TokenGrant,
        requested_at: DateTime<Utc>,
        previous: Option<&TokenState>,
        via: &str,
    ) -> Result<String, AuthError> {
        let state = TokenState::from_grant(
            grant,
            requested_at,
            self.access_buffer,
            self.refresh_buffer,
            previous,
        );

        if !state.access_valid_at(Utc::now()) {
            return Err(AuthError::InvalidResponse(format!(
                "token lifetime does not exceed the {}s safety buffer",
                self.access_buffer.as_secs()
            )));
        }

        if let Err(e) = self.store.save(&state).await {
            tracing::warn!(error = %e, "failed to persist token state");
        }
        if let Err(e) = self.store.write_header(&state.access_token).await {
            tracing::warn!(error = %e, "failed to write bearer header file");
        }

        tracing::info!(
            via,
            access_expires_at = %state.access_expires_at,
            refresh_expires_at = %state.refresh_expires_at,
            "obtained new access token"
        );
        self.event_tx
            .send(Event::TokenRefreshed {
                via: via.to_string(),
            })
            .ok();

        let token = state.access_token.clone();
        *guard = Some(state);
        Ok(token)
    }
}

/// Handle to the running renewal loop
struct RenewalTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Owner of the renewal slot; cancels the loop when the last manager clone drops
#[derive(Default)]
struct RenewalSlot {
    task: Mutex<Option<RenewalTask>>,
}

impl Drop for RenewalSlot {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

/// Issues, caches and renews bearer tokens (cloneable; clones share state)
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
    renewal: Arc<RenewalSlot>,
    renewal_interval: Duration,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_path", &self.inner.store.token_path())
            .field("renewal_interval", &self.renewal_interval)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager, loading any persisted token state
    ///
    /// Buffers below [`MIN_ACCESS_BUFFER`]/[`MIN_REFRESH_BUFFER`] are raised to
    /// the minimum.
    pub async fn new(
        client: Arc<dyn AuthClient>,
        credentials: Option<Credentials>,
        store: CredentialStore,
        config: &AuthConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self, AuthError> {
        let persisted = store.load().await?;
        if persisted.is_some() {
            tracing::debug!(path = %store.token_path().display(), "loaded cached token state");
        }

        let inner = ManagerInner {
            client,
            credentials,
            store,
            state: Mutex::new(persisted),
            access_buffer: config.access_buffer.max(MIN_ACCESS_BUFFER),
            refresh_buffer: config.refresh_buffer.max(MIN_REFRESH_BUFFER),
            event_tx,
            exchanges: AtomicU64::new(0),
        };

        Ok(Self {
            inner: Arc::new(inner),
            renewal: Arc::new(RenewalSlot::default()),
            renewal_interval: config.renewal_interval,
        })
    }

    /// Create a manager talking to the configured OpenID Connect endpoint
    pub async fn from_config(
        config: &AuthConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self, AuthError> {
        let client = Arc::new(OidcAuthClient::new(config)?);
        let store = CredentialStore::new(config.token_path(), config.header_path());
        Self::new(client, config.credentials(), store, config, event_tx).await
    }

    /// Return a bearer token with real remaining life
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoCredentials`] when no cached path works and no
    /// username/password are configured, or [`AuthError::Exhausted`] carrying
    /// the password-authentication failure.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        self.inner.get_token().await
    }

    /// `Bearer <token>` for an `Authorization` header
    pub async fn bearer_header(&self) -> Result<String, AuthError> {
        Ok(format!("Bearer {}", self.get_token().await?))
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> Option<TokenState> {
        self.inner.state.lock().await.clone()
    }

    /// Number of network exchanges attempted so far
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    /// Credential store backing this manager
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Start the background renewal loop (no-op when already running)
    pub async fn start_renewal(&self) {
        let mut slot = self.renewal.task.lock().await;
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = spawn_renewal(
            Arc::clone(&self.inner),
            self.renewal_interval,
            cancel.clone(),
        );
        *slot = Some(RenewalTask { cancel, handle });
        tracing::info!(
            interval_secs = self.renewal_interval.as_secs(),
            "started background token renewal"
        );
    }

    /// Whether the renewal loop is running
    pub async fn is_renewing(&self) -> bool {
        self.renewal.task.lock().await.is_some()
    }

    /// Stop the renewal loop and wait for it to exit
    pub async fn stop_renewal(&self) {
        let task = self.renewal.task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::error!(error = %e, "token renewal task panicked");
            }
            tracing::info!("stopped background token renewal");
        }
    }

    /// Stop renewal and forget all tokens, in memory and on disk
    ///
    /// Calling it again is harmless.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.stop_renewal().await;
        let mut guard = self.inner.state.lock().await;
        *guard = None;
        self.inner.store.clear().await
    }
}

/// Spawn the renewal loop; the first renewal happens one interval from now
fn spawn_renewal(
    inner: Arc<ManagerInner>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    match inner.get_token().await {
                        Ok(_) => tracing::debug!("background token renewal succeeded"),
                        Err(e) => {
                            tracing::warn!(error = %e, "background token renewal failed, retrying next interval");
                            inner
                                .event_tx
                                .send(Event::TokenRenewalFailed {
                                    error: e.to_string(),
                                })
                                .ok();
                        }
                    }
                }
            }
        }
    })
}

#[async_trait]
impl CredentialSupplier for TokenManager {
    async fn bearer_token(&self) -> crate::error::Result<String> {
        self.get_token().await.map_err(Error::from)
    }
}
