//! Credential supply: the transport asks a [`TokenSource`] for a bearer
//! token and a project id on every request rather than caching one itself,
//! so callers can plug in whatever refresh policy they like.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Error;

/// Supplies the bearer token and project id the transport attaches to every
/// request. Implementations are expected to cache and refresh the
/// token themselves; the transport calls this on every request and does no
/// caching of its own.
#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    /// Returns a valid bearer token and its expiry.
    async fn access_token(&self) -> Result<(String, DateTime<Utc>), Error>;

    /// The project id to route requests to.
    async fn project_id(&self) -> Result<String, Error>;
}

/// A `TokenSource` that always returns the same, never-expiring token.
/// Useful for talking to a local emulator, or in tests.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
    project_id: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>, project_id: impl Into<String>) -> Self {
        StaticTokenSource {
            token: token.into(),
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<(String, DateTime<Utc>), Error> {
        Ok((self.token.clone(), DateTime::<Utc>::MAX_UTC))
    }

    async fn project_id(&self) -> Result<String, Error> {
        Ok(self.project_id.clone())
    }
}

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    project_id: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct Cached {
    token: String,
    expiry: DateTime<Utc>,
}

/// A [`TokenSource`] that mints its own access tokens from a service-account
/// JSON key by signing and exchanging an RS256 JWT for a bearer token,
/// caching the result until it is within `refresh_skew` of expiry (60
/// seconds by default).
pub struct ServiceAccountTokenSource {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: jsonwebtoken::EncodingKey,
    refresh_skew: chrono::Duration,
    cached: Mutex<Option<Cached>>,
}

impl ServiceAccountTokenSource {
    /// Parses a service-account JSON key (the same shape `gcloud` downloads)
    /// and prepares it for signing. Fails with `ConfigurationError` if the
    /// JSON or the embedded PEM private key is malformed.
    pub fn from_json(http: reqwest::Client, json: &[u8]) -> Result<Self, Error> {
        let key: ServiceAccountKey = serde_json::from_slice(json).map_err(|e| {
            Error::ConfigurationError {
                detail: format!("invalid service account key: {e}"),
            }
        })?;
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::ConfigurationError {
                detail: format!("invalid service account private key: {e}"),
            })?;
        Ok(ServiceAccountTokenSource {
            http,
            key,
            encoding_key,
            refresh_skew: chrono::Duration::seconds(60),
            cached: Mutex::new(None),
        })
    }

    pub fn with_refresh_skew(mut self, skew: chrono::Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    async fn refresh(&self) -> Result<(String, DateTime<Utc>), Error> {
        let now = Utc::now();
        let claims = Claims {
            iss: self.key.client_email.clone(),
            scope: DATASTORE_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
        };
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let jwt = jsonwebtoken::encode(&header, &claims, &self.encoding_key).map_err(|e| {
            Error::AuthError {
                detail: format!("signing service account JWT: {e}"),
            }
        })?;

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::AuthError {
                detail: format!("exchanging service account JWT: {e}"),
            })?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::AuthError {
                detail: format!("token endpoint returned an error: {body}"),
            });
        }

        let parsed: TokenResponse = resp.json().await.map_err(|e| Error::AuthError {
            detail: format!("decoding token response: {e}"),
        })?;
        let expiry = now + chrono::Duration::seconds(parsed.expires_in);
        Ok((parsed.access_token, expiry))
    }
}

impl std::fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.key.client_email)
            .field("project_id", &self.key.project_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<(String, DateTime<Utc>), Error> {
        {
            let cached = self.cached.lock().await;
            if let Some(entry) = cached.as_ref() {
                if entry.expiry - Utc::now() > self.refresh_skew {
                    return Ok((entry.token.clone(), entry.expiry));
                }
            }
        }
        let (token, expiry) = self.refresh().await?;
        *self.cached.lock().await = Some(Cached {
            token: token.clone(),
            expiry,
        });
        Ok((token, expiry))
    }

    async fn project_id(&self) -> Result<String, Error> {
        Ok(self.key.project_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_source_never_expires() {
        let source = StaticTokenSource::new("tok", "proj");
        let (token, expiry) = source.access_token().await.unwrap();
        assert_eq!(token, "tok");
        assert_eq!(expiry, DateTime::<Utc>::MAX_UTC);
        assert_eq!(source.project_id().await.unwrap(), "proj");
    }
}
