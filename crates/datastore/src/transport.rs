//! Authenticated HTTP transport with bounded retry and jittered exponential
//! backoff. One call here issues one logical RPC: a JSON POST to one of the
//! fixed endpoint suffixes (`lookup`, `runQuery`, `commit`, `rollback`,
//! `beginTransaction`, `allocateIds`, `reserveIds`).

use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::TokenSource;
use crate::backoff;
use crate::error::Error;

/// A 10 MiB cap on response bodies, to bound memory use against a hostile or
/// misbehaving server.
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to one logical endpoint base (`.../projects/{projectId}`) and
/// applies the retry policy uniformly across every RPC the operation engine
/// issues.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: Url,
    database_id: Option<String>,
    request_timeout: Duration,
}

impl Transport {
    pub fn new(http: reqwest::Client, base_url: Url, database_id: Option<String>) -> Self {
        Transport {
            http,
            base_url,
            database_id,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Issues one RPC against `{base_url}/projects/{projectId}:{op}`,
    /// retrying transport errors and 5xx responses up to `MAX_ATTEMPTS`
    /// times with jittered exponential backoff, honoring `cancellation`
    /// during both the send and the backoff sleep.
    pub async fn call<Req, Resp>(
        &self,
        op: &str,
        body: &Req,
        auth: &dyn TokenSource,
        cancellation: &CancellationToken,
    ) -> Result<Resp, Error>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let project_id = auth.project_id().await?;
        let url = self.endpoint_url(&project_id, op)?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| Error::Protocol { detail: format!("encoding request body: {e}") })?;

        let retry_schedule = backoff::new(
            backoff::DEFAULT_MAX_ATTEMPTS,
            backoff::DEFAULT_BASE,
            backoff::DEFAULT_CAP,
        );
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if cancellation.is_cancelled() {
                return Err(Error::Canceled);
            }

            tracing::debug!(%url, attempt, "sending datastore request");
            let outcome = self
                .send_once(&url, &payload, &project_id, auth, cancellation)
                .await;

            match outcome {
                Ok(resp) => return self.read_body(resp).await,
                Err(Retryable::No(err)) => return Err(err),
                Err(Retryable::Yes(err)) => {
                    if attempt >= backoff::DEFAULT_MAX_ATTEMPTS {
                        return Err(err);
                    }
                    let delay = retry_schedule.next(attempt).unwrap_or(backoff::DEFAULT_CAP);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying datastore request");
                    let jittered = backoff::jitter(delay, backoff::DEFAULT_JITTER);
                    backoff::sleep_cancellable(jittered, cancellation).await?;
                }
            }
        }
    }

    fn endpoint_url(&self, project_id: &str, op: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::ConfigurationError { detail: "base URL cannot be a base".into() })?;
            // `push` percent-encodes the segment itself; pre-encoding with the
            // form-urlencoded `urlencoding` helper would turn spaces into literal
            // `+` instead of `%20`, so the raw project id goes in untouched.
            segments.push("projects");
            segments.push(&format!("{project_id}:{op}"));
        }
        Ok(url)
    }

    async fn send_once(
        &self,
        url: &Url,
        payload: &[u8],
        project_id: &str,
        auth: &dyn TokenSource,
        cancellation: &CancellationToken,
    ) -> Result<reqwest::Response, Retryable> {
        let (token, _expiry) = auth
            .access_token()
            .await
            .map_err(|e| Retryable::No(e))?;

        let mut req = self
            .http
            .post(url.clone())
            .timeout(self.request_timeout)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        if let Some(database_id) = &self.database_id {
            req = req.header(
                "X-Goog-Request-Params",
                format!(
                    "project_id={}&database_id={}",
                    urlencoding(project_id),
                    urlencoding(database_id)
                ),
            );
        }

        let send_fut = req.send();
        let resp = tokio::select! {
            result = send_fut => result.map_err(classify_transport_error)?,
            _ = cancellation.cancelled() => return Err(Retryable::No(Error::Canceled)),
        };

        let status = resp.status();
        if status == StatusCode::OK {
            Ok(resp)
        } else if status.is_success() {
            Err(Retryable::No(Error::Protocol {
                detail: format!("unexpected success status {status}"),
            }))
        } else if status.is_server_error() {
            Err(Retryable::Yes(Error::ServerError {
                status: status.as_u16(),
                body: truncated_body(resp).await,
            }))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Retryable::No(Error::AuthError {
                detail: truncated_body(resp).await,
            }))
        } else {
            Err(Retryable::No(Error::ServerError {
                status: status.as_u16(),
                body: truncated_body(resp).await,
            }))
        }
    }

    async fn read_body<Resp: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<Resp, Error> {
        let bytes = read_capped(resp).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Protocol { detail: format!("decoding response body: {e}") })
    }
}

enum Retryable {
    Yes(Error),
    No(Error),
}

fn classify_transport_error(err: reqwest::Error) -> Retryable {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Retryable::Yes(Error::TransportError { source: err })
    } else {
        Retryable::No(Error::TransportError { source: err })
    }
}

async fn read_capped(resp: reqwest::Response) -> Result<Vec<u8>, Error> {
    use futures::StreamExt;

    let mut stream = resp.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::TransportError { source: e })?;
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(Error::Protocol {
                detail: format!("response body exceeded {MAX_RESPONSE_BYTES} byte cap"),
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

const TRUNCATED_BODY_CHARS: usize = 2048;

/// Reads enough of an error response to log/report, without buffering an
/// unbounded or maliciously oversized body: the stream is abandoned as soon
/// as it holds more bytes than the eventual char truncation could ever use.
async fn truncated_body(resp: reqwest::Response) -> String {
    use futures::StreamExt;

    const MAX_DISPLAY_BYTES: usize = TRUNCATED_BODY_CHARS * 4;

    let mut stream = resp.bytes_stream();
    let mut body = Vec::new();
    while body.len() < MAX_DISPLAY_BYTES {
        match stream.next().await {
            Some(Ok(chunk)) => body.extend_from_slice(&chunk),
            Some(Err(_)) | None => break,
        }
    }
    String::from_utf8_lossy(&body)
        .chars()
        .take(TRUNCATED_BODY_CHARS)
        .collect()
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_places_project_and_op_as_separate_segments() {
        let transport = Transport::new(
            reqwest::Client::new(),
            Url::parse("https://datastore.googleapis.com/v1/").unwrap(),
            None,
        );
        let url = transport.endpoint_url("my-project", "lookup").unwrap();
        assert_eq!(url.path(), "/v1/projects/my-project:lookup");
    }

    #[test]
    fn endpoint_url_percent_encodes_the_project_id() {
        let transport = Transport::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9999/").unwrap(),
            None,
        );
        let url = transport.endpoint_url("a b", "commit").unwrap();
        assert_eq!(url.path(), "/projects/a%20b:commit");
    }
}
