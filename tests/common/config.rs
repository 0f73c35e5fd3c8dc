//! Test configuration helpers and a mock OpenID Connect token endpoint

use satstack::Config;
use std::path::Path;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the mock token endpoint
pub const TOKEN_PATH: &str = "/auth/realms/test/protocol/openid-connect/token";

/// Anonymous configuration writing under `dir`
pub fn offline_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_dir = dir.join("downloads");
    config.auth.credential_dir = dir.join("credentials");
    config.auth.username = None;
    config.auth.password = None;
    config
}

/// Configuration authenticating against `server`'s token endpoint
pub fn authenticated_config(dir: &Path, server: &MockServer) -> Config {
    let mut config = offline_config(dir);
    config.auth.token_url = format!("{}{TOKEN_PATH}", server.uri());
    config.auth.username = Some("analyst@example.com".to_string());
    config.auth.password = Some("correct horse".to_string());
    config
}

/// Token endpoint body for one grant
pub fn grant(access_token: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "refresh_token": format!("refresh-{access_token}"),
        "refresh_expires_in": 1800,
        "token_type": "Bearer",
    })
}

/// Answer password grants with `access_token`, expecting `times` calls
pub async fn mount_password_grant(
    server: &MockServer,
    access_token: &str,
    expires_in: u64,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(access_token, expires_in)))
        .expect(times)
        .mount(server)
        .await;
}

/// Answer refresh grants with `access_token`, expecting `times` calls
pub async fn mount_refresh_grant(
    server: &MockServer,
    access_token: &str,
    expires_in: u64,
    times: u64,
) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(access_token, expires_in)))
        .expect(times)
        .mount(server)
        .await;
}
