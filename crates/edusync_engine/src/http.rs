//! REST remote client.
//!
//! This module adapts the [`RemoteClient`] abstraction to a JSON REST API.
//! The actual HTTP library is abstracted via [`HttpClient`] so the engine
//! does not pick one (reqwest, hyper, a browser `fetch` bridge, ...).

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::{Method, RemoteClient, RemoteRequest};
use crate::session::SessionContext;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// A raw HTTP request produced by [`RestClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Encoded JSON body.
    pub body: Option<Vec<u8>>,
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implementations only move bytes; status handling and JSON decoding
/// happen in [`RestClient`]. An `Err` means no response was received.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// JSON REST client bound to one session.
pub struct RestClient<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.school.example/v1").
    base_url: String,
    client: C,
    session: Option<SessionContext>,
    timeout: Option<Duration>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> RestClient<C> {
    /// Creates an unauthenticated client.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            session: None,
            timeout: None,
            last_error: RwLock::new(None),
        }
    }

    /// Creates a client from the base URL and timeout of `config`.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(config.base_url.clone(), client).with_timeout(config.request_timeout)
    }

    /// Attaches the session whose token authenticates every call.
    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = Some(session);
        self
    }

    /// Applies a timeout to every call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the session, if any.
    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    /// Returns the message of the last failed call.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self, request: &RemoteRequest) -> RemoteResult<HttpRequest> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(session) = &self.session {
            headers.push(("Authorization".to_string(), session.authorization()));
        }

        let body = match &request.payload {
            Some(payload) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(serde_json::to_vec(payload).map_err(|e| RemoteError::Encode(e.to_string()))?)
            }
            None => None,
        };

        Ok(HttpRequest {
            method: request.method,
            url: self.url_for(&request.path),
            headers,
            body,
        })
    }

    fn record(&self, result: &RemoteResult<Value>) {
        *self.last_error.write() = result.as_ref().err().map(|e| e.to_string());
    }
}

/// Decodes a body, treating an empty body as `null`.
fn decode_body(body: &[u8]) -> Option<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Some(Value::Null);
    }
    serde_json::from_slice(body).ok()
}

fn into_result(response: HttpResponse) -> RemoteResult<Value> {
    if (200..300).contains(&response.status) {
        return decode_body(&response.body).ok_or_else(|| {
            RemoteError::Decode(format!(
                "response with status {} is not JSON",
                response.status
            ))
        });
    }

    // Error bodies are surfaced verbatim; non-JSON ones as a string.
    let body = decode_body(&response.body)
        .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
    Err(RemoteError::rejected(response.status, body))
}

#[async_trait]
impl<C: HttpClient> RemoteClient for RestClient<C> {
    async fn call(&self, request: RemoteRequest) -> RemoteResult<Value> {
        let http_request = self.build(&request)?;
        debug!(method = %request.method, url = %http_request.url, "remote call");

        let send = self.client.send(http_request);
        let sent = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(sent) => sent,
                Err(_) => {
                    let result = Err(RemoteError::Timeout);
                    self.record(&result);
                    return result;
                }
            },
            None => send.await,
        };

        let result = sent
            .map_err(|e| RemoteError::network(e))
            .and_then(into_result);
        self.record(&result);
        result
    }
}
