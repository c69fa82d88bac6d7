use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{QuatiError, Result};
use crate::logging;

pub const SHEETS_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];
pub const BIGQUERY_SCOPES: &[&str] = &["https://www.googleapis.com/auth/bigquery"];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are renewed this long before Google says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies OAuth bearer tokens for the Google REST APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A token obtained out of band.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.sheets
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .map(Self)
            .ok_or_else(|| QuatiError::Config("GOOGLE_ACCESS_TOKEN is not set".to_string()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The fields of a service-account JSON key used for the token exchange.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            QuatiError::Config(format!("cannot read credentials {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            QuatiError::Config(format!("invalid credentials {}: {e}", path.display()))
        })
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    token: String,
    renew_at: Instant,
}

/// Exchanges a signed service-account assertion for bearer tokens and
/// caches each token until shortly before it expires.
pub struct ServiceAccount {
    http: Client,
    key: ServiceAccountKey,
    signer: EncodingKey,
    scopes: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    pub fn new(key: ServiceAccountKey, scopes: &[&str]) -> Result<Self> {
        let signer = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| QuatiError::Config(format!("invalid service-account private key: {e}")))?;
        Ok(Self {
            http: Client::new(),
            key,
            signer,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            cached: Mutex::new(None),
        })
    }

    pub fn from_file(path: impl AsRef<Path>, scopes: &[&str]) -> Result<Self> {
        Self::new(ServiceAccountKey::from_file(path)?, scopes)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        jsonwebtoken::encode(&header, &claims, &self.signer)
            .map_err(|e| QuatiError::Config(format!("cannot sign token request: {e}")))
    }

    async fn exchange(&self) -> Result<TokenResponse> {
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(status = status.as_u16(), "{}", logging::api_failure(status.as_u16()));
            return Err(QuatiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.key.client_email)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ServiceAccount {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref().filter(|c| Instant::now() < c.renew_at) {
            return Ok(current.token.clone());
        }

        let fresh = self.exchange().await?;
        tracing::debug!(
            account = %self.key.client_email,
            expires_in = fresh.expires_in,
            "Service-account token issued"
        );
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: fresh.access_token.clone(),
            renew_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

/// Token source for `scopes` from configuration.
///
/// A configured access token wins; otherwise the service-account key at
/// `credentials_file` is used.
pub fn token_source(cfg: &Config, scopes: &[&str]) -> Result<Arc<dyn TokenSource>> {
    if let Ok(token) = StaticToken::from_config(cfg) {
        return Ok(Arc::new(token));
    }
    match &cfg.sheets.credentials_file {
        Some(path) => Ok(Arc::new(ServiceAccount::from_file(path, scopes)?)),
        None => Err(QuatiError::Config(
            "set GOOGLE_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/test_service_account.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/test_service_account.pub.pem");

    fn key_file(token_uri: &str) -> NamedTempFile {
        let file = NamedTempFile::new().expect("temp file");
        let key = json!({
            "type": "service_account",
            "project_id": "mkt-data",
            "private_key_id": "k1",
            "private_key": PRIVATE_KEY,
            "client_email": "etl@mkt-data.iam.gserviceaccount.com",
            "token_uri": token_uri
        });
        fs::write(file.path(), key.to_string()).expect("write key");
        file
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let cfg = Config::default();
        assert!(matches!(
            StaticToken::from_config(&cfg),
            Err(QuatiError::Config(_))
        ));
        assert!(matches!(
            token_source(&cfg, SHEETS_SCOPES),
            Err(QuatiError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_debug_hides_token() {
        let token = StaticToken::new("ya29.secret");
        assert_eq!(format!("{token:?}"), "StaticToken(***)");
        assert_eq!(token.access_token().await.expect("static"), "ya29.secret");
    }

    #[tokio::test]
    async fn test_service_account_exchanges_signed_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.minted",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/token", server.uri());
        let file = key_file(&token_uri);
        let account = ServiceAccount::from_file(file.path(), SHEETS_SCOPES).expect("key loads");
        assert_eq!(account.client_email(), "etl@mkt-data.iam.gserviceaccount.com");

        assert_eq!(account.access_token().await.expect("minted"), "ya29.minted");
        // second call is served from the cache
        assert_eq!(account.access_token().await.expect("cached"), "ya29.minted");

        let requests = server.received_requests().await.expect("recording on");
        let body = String::from_utf8(requests[0].body.clone()).expect("utf8 form");
        let assertion = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
            .expect("assertion field");

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[token_uri.as_str()]);
        let decoded = jsonwebtoken::decode::<Value>(
            assertion,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("public key"),
            &validation,
        )
        .expect("signature verifies");
        assert_eq!(decoded.header.kid.as_deref(), Some("k1"));
        assert_eq!(decoded.claims["iss"], "etl@mkt-data.iam.gserviceaccount.com");
        assert_eq!(
            decoded.claims["scope"],
            "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive"
        );
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let file = key_file(&format!("{}/token", server.uri()));
        let account = ServiceAccount::from_file(file.path(), BIGQUERY_SCOPES).expect("key loads");
        assert!(matches!(
            account.access_token().await,
            Err(QuatiError::Api { status: 400, .. })
        ));
    }

    #[test]
    fn test_unreadable_key_is_config_error() {
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), r#"{"client_email": "x"}"#).expect("write");
        assert!(matches!(
            ServiceAccount::from_file(file.path(), BIGQUERY_SCOPES),
            Err(QuatiError::Config(_))
        ));
        assert!(matches!(
            ServiceAccount::from_file("/nonexistent/key.json", BIGQUERY_SCOPES),
            Err(QuatiError::Config(_))
        ));
    }

    #[test]
    fn test_configured_credentials_file_is_used() {
        let file = key_file("https://oauth2.googleapis.com/token");
        let mut cfg = Config::default();
        cfg.sheets.credentials_file = Some(file.path().to_path_buf());
        assert!(token_source(&cfg, SHEETS_SCOPES).is_ok());
    }
}
