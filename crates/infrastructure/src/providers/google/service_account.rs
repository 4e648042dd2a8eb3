use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use passage_core::{AppError, AppResult};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::providers::http::{read_json, transport_error};
use crate::providers::secret_file::read_secret_file;

const DIRECTORY_SCOPES: &str = "https://www.googleapis.com/auth/admin.directory.group \
                                https://www.googleapis.com/auth/admin.directory.group.member";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// The fields of a Google service account key file this provider reads.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Access tokens minted from a service account key with the JWT bearer grant.
///
/// The key file is read on every mint so rotated keys are picked up. Tokens
/// are reused until a minute before they expire.
pub(super) struct ServiceAccountTokens {
    client: reqwest::Client,
    key_path: PathBuf,
    subject: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub(super) fn new(client: reqwest::Client, key_path: PathBuf, subject: Option<String>) -> Self {
        Self {
            client,
            key_path,
            subject,
            cached: Mutex::new(None),
        }
    }

    pub(super) async fn bearer(&self) -> AppResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) > Utc::now()
        {
            return Ok(token.value.clone());
        }

        let minted = self.mint().await?;
        let value = minted.value.clone();
        *cached = Some(minted);
        Ok(value)
    }

    async fn mint(&self) -> AppResult<CachedToken> {
        let raw = read_secret_file(&self.key_path, "google service account").await?;
        let key: ServiceAccountKey = serde_json::from_str(raw.as_str()).map_err(|error| {
            AppError::Configuration(format!(
                "google service account file '{}' is not a service account key: {error}",
                self.key_path.display()
            ))
        })?;
        let token_uri = key
            .token_uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .unwrap_or(DEFAULT_TOKEN_URI);

        let now = Utc::now();
        let claims = AssertionClaims {
            iss: key.client_email.as_str(),
            scope: DIRECTORY_SCOPES,
            aud: token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECONDS,
            sub: self.subject.as_deref(),
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|error| {
            AppError::Configuration(format!(
                "google service account '{}' has an unusable private key: {error}",
                key.client_email
            ))
        })?;
        let assertion = encode(&header, &claims, &signing_key).map_err(|error| {
            AppError::Internal(format!("failed to sign google token assertion: {error}"))
        })?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", assertion.as_str())
            .finish();
        let response = self
            .client
            .post(token_uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|error| transport_error("google token exchange", error))?;
        let token: TokenResponse = read_json(response, "google token exchange").await?;

        debug!(
            client_email = %key.client_email,
            expires_in = ?token.expires_in,
            "minted google directory token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now
                + Duration::seconds(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECONDS)),
        })
    }
}
