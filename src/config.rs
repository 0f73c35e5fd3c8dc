//! Configuration types for satstack

use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::types::{DownloadOptions, MergeSpec};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Environment variable consulted when no username is configured
pub const USERNAME_ENV: &str = "SATSTACK_USERNAME";
/// Environment variable consulted when no password is configured
pub const PASSWORD_ENV: &str = "SATSTACK_PASSWORD";

/// Token endpoint and credential lifecycle settings
///
/// Groups everything the [`TokenManager`](crate::auth::TokenManager) needs:
/// where to exchange credentials, where to persist tokens, and how
/// aggressively to renew them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// OpenID Connect token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// OAuth client id sent with every grant
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Account username (falls back to `SATSTACK_USERNAME`)
    #[serde(default)]
    pub username: Option<String>,

    /// Account password (falls back to `SATSTACK_PASSWORD`, never serialized)
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Directory holding the persisted token state and bearer header file
    #[serde(default = "default_credential_dir")]
    pub credential_dir: PathBuf,

    /// Interval between background renewals (default: 240s)
    ///
    /// Must be shorter than the access-token lifetime so downstream readers
    /// never see an expired header.
    #[serde(default = "default_renewal_interval", with = "duration_serde")]
    pub renewal_interval: Duration,

    /// Safety margin subtracted from the access-token lifetime (default: 30s)
    #[serde(default = "default_access_buffer", with = "duration_serde")]
    pub access_buffer: Duration,

    /// Safety margin subtracted from the refresh-token lifetime (default: 60s)
    #[serde(default = "default_refresh_buffer", with = "duration_serde")]
    pub refresh_buffer: Duration,

    /// Timeout for a single token request (default: 30s)
    #[serde(default = "default_auth_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            client_id: default_client_id(),
            username: None,
            password: None,
            credential_dir: default_credential_dir(),
            renewal_interval: default_renewal_interval(),
            access_buffer: default_access_buffer(),
            refresh_buffer: default_refresh_buffer(),
            request_timeout: default_auth_timeout(),
        }
    }
}

impl AuthConfig {
    /// Resolve username/password from config, then from the environment
    ///
    /// Returns `None` when either half is missing.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self
            .username
            .clone()
            .or_else(|| std::env::var(USERNAME_ENV).ok())?;
        let password = self
            .password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())?;
        Some(Credentials::new(username, password))
    }

    /// Path of the persisted token state
    pub fn token_path(&self) -> PathBuf {
        self.credential_dir.join("token.json")
    }

    /// Path of the bearer header file consumed by downstream HTTP readers
    pub fn header_path(&self) -> PathBuf {
        self.credential_dir.join("bearer_header")
    }
}

/// Download behavior configuration (directories, concurrency, re-run semantics)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory for assets and merged rasters (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrent asset downloads (default: 4)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Reuse previously completed files instead of fetching again (default: true)
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Re-fetch even when a completed file exists (default: false)
    #[serde(default)]
    pub overwrite: bool,

    /// Total timeout for a single asset request (default: 300s)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout (default: 30s)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_parallel: default_max_parallel(),
            skip_existing: true,
            overwrite: false,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Merge defaults applied when the caller does not supply a full [`MergeSpec`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Output pixel size; `None` uses the first band in order
    #[serde(default)]
    pub target_pixel_size: Option<f64>,

    /// Pixel-size difference still treated as "same resolution" (default: 0.01)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Replace an existing merged file (default: false)
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            target_pixel_size: None,
            tolerance: default_tolerance(),
            overwrite: false,
        }
    }
}

/// Main configuration for [`SceneStacker`](crate::SceneStacker)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Token endpoint and credential lifecycle
    #[serde(default)]
    pub auth: AuthConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Merge defaults
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Config {
    /// Output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.download.output_dir
    }

    /// Download options derived from the download section
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            max_parallel: self.download.max_parallel,
            skip_existing: self.download.skip_existing,
            overwrite: self.download.overwrite,
        }
    }

    /// Merge spec for the given band order using the merge defaults
    pub fn merge_spec(&self, band_order: Vec<String>) -> MergeSpec {
        MergeSpec {
            band_order,
            target_pixel_size: self.merge.target_pixel_size,
            tolerance: self.merge.tolerance,
            overwrite: self.merge.overwrite,
        }
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.max_parallel == 0 {
            return Err(Error::Config {
                message: "max_parallel must be at least 1".to_string(),
                key: Some("max_parallel".to_string()),
            });
        }
        if !(self.merge.tolerance.is_finite() && self.merge.tolerance >= 0.0) {
            return Err(Error::Config {
                message: format!("tolerance must be non-negative, got {}", self.merge.tolerance),
                key: Some("tolerance".to_string()),
            });
        }
        if let Some(size) = self.merge.target_pixel_size
            && !(size.is_finite() && size > 0.0)
        {
            return Err(Error::Config {
                message: format!("target_pixel_size must be positive, got {size}"),
                key: Some("target_pixel_size".to_string()),
            });
        }
        if self.auth.renewal_interval.is_zero() {
            return Err(Error::Config {
                message: "renewal_interval must be greater than zero".to_string(),
                key: Some("renewal_interval".to_string()),
            });
        }
        Ok(())
    }
}

fn default_token_url() -> String {
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token"
        .to_string()
}

fn default_client_id() -> String {
    "cdse-public".to_string()
}

fn default_credential_dir() -> PathBuf {
    PathBuf::from("./.satstack")
}

fn default_renewal_interval() -> Duration {
    Duration::from_secs(240)
}

fn default_access_buffer() -> Duration {
    Duration::from_secs(30)
}

fn default_refresh_buffer() -> Duration {
    Duration::from_secs(60)
}

fn default_auth_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_parallel() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_tolerance() -> f64 {
    0.01
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.download.max_parallel, 4);
        assert!(config.download.skip_existing);
        assert!(!config.download.overwrite);
        assert_eq!(config.merge.tolerance, 0.01);
        assert_eq!(config.auth.renewal_interval, Duration::from_secs(240));
        assert_eq!(config.auth.access_buffer, Duration::from_secs(30));
        assert_eq!(config.auth.refresh_buffer, Duration::from_secs(60));
    }

    #[test]
    fn password_is_never_serialized() {
        let config = Config {
            auth: AuthConfig {
                username: Some("alice".to_string()),
                password: Some("hunter2".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("alice"));
        assert!(!json.contains("hunter2"), "password leaked: {json}");
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = r#"{"auth": {"renewal_interval": 120, "access_buffer": 45}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.auth.renewal_interval, Duration::from_secs(120));
        assert_eq!(config.auth.access_buffer, Duration::from_secs(45));
    }

    #[test]
    fn configured_credentials_take_precedence() {
        let auth = AuthConfig {
            username: Some("alice".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let creds = auth.credentials().unwrap();
        assert_eq!(creds.username(), "alice");
        assert_eq!(creds.password(), "secret");
    }

    #[test]
    fn validate_rejects_zero_parallelism() {
        let mut config = Config::default();
        config.download.max_parallel = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "max_parallel"));
    }

    #[test]
    fn validate_rejects_non_positive_target_pixel_size() {
        let mut config = Config::default();
        config.merge.target_pixel_size = Some(0.0);
        assert!(config.validate().is_err());

        config.merge.target_pixel_size = Some(10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn credential_paths_live_in_credential_dir() {
        let auth = AuthConfig {
            credential_dir: PathBuf::from("/tmp/creds"),
            ..Default::default()
        };
        assert_eq!(auth.token_path(), PathBuf::from("/tmp/creds/token.json"));
        assert_eq!(auth.header_path(), PathBuf::from("/tmp/creds/bearer_header"));
    }

    #[test]
    fn download_options_mirror_config() {
        let mut config = Config::default();
        config.download.max_parallel = 7;
        config.download.overwrite = true;
        let opts = config.download_options();
        assert_eq!(opts.max_parallel, 7);
        assert!(opts.overwrite);
        assert!(opts.skip_existing);
    }
}
