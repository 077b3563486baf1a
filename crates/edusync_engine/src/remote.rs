//! Remote call abstraction.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// HTTP-style method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call against the remote API.
///
/// `path` is relative to the API root; the remote client owns the base URL
/// and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Method.
    pub method: Method,
    /// Path relative to the API root.
    pub path: String,
    /// JSON body.
    pub payload: Option<Value>,
}

impl RemoteRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request.
    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, path).with_payload(payload)
    }

    /// Creates a PUT request.
    pub fn put(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Put, path).with_payload(payload)
    }

    /// Creates a PATCH request.
    pub fn patch(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Patch, path).with_payload(payload)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attaches a JSON body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Encodes a payload as a JSON request body.
pub fn encode_payload<P: Serialize>(payload: &P) -> RemoteResult<Value> {
    serde_json::to_value(payload).map_err(|e| RemoteError::Encode(e.to_string()))
}

/// A remote client executes calls against the REST API.
///
/// The engine never builds URLs or headers itself; implementations own
/// the transport, the base URL and authentication.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Executes one call and returns the decoded JSON body.
    ///
    /// Empty bodies decode as `Value::Null`.
    async fn call(&self, request: RemoteRequest) -> RemoteResult<Value>;
}

#[async_trait]
impl<R: RemoteClient + ?Sized> RemoteClient for std::sync::Arc<R> {
    async fn call(&self, request: RemoteRequest) -> RemoteResult<Value> {
        (**self).call(request).await
    }
}

/// Scripted behavior of one mocked route.
#[derive(Debug, Clone)]
enum MockRule {
    Respond(Value),
    Fail(RemoteError),
}

/// A scripted remote for testing.
///
/// Unscripted routes echo the request body back; POST echoes gain a fresh
/// numeric `id` when the body has none, and DELETE returns `null`.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    rules: Mutex<HashMap<(Method, String), MockRule>>,
    delays: Mutex<HashMap<(Method, String), Duration>>,
    default_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<RemoteRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: AtomicI64,
}

impl MockRemote {
    /// Creates a new mock remote.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            rules: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            default_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_id: AtomicI64::new(1000),
        }
    }

    /// Makes a route answer with `body`.
    pub fn respond(&self, method: Method, path: impl Into<String>, body: Value) {
        self.rules
            .lock()
            .insert((method, path.into()), MockRule::Respond(body));
    }

    /// Makes a route fail with `error`.
    pub fn fail(&self, method: Method, path: impl Into<String>, error: RemoteError) {
        self.rules
            .lock()
            .insert((method, path.into()), MockRule::Fail(error));
    }

    /// Restores the default echo behavior of a route.
    pub fn clear(&self, method: Method, path: &str) {
        self.rules.lock().remove(&(method, path.to_string()));
    }

    /// Delays every call to a route.
    pub fn delay(&self, method: Method, path: impl Into<String>, delay: Duration) {
        self.delays.lock().insert((method, path.into()), delay);
    }

    /// Delays every call without a route-specific delay.
    pub fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.lock() = Some(delay);
    }

    /// Sets the connected state; disconnected calls fail as network errors.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of calls received for a route.
    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Returns the highest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn default_response(&self, request: &RemoteRequest) -> Value {
        match (request.method, &request.payload) {
            (Method::Delete, _) => Value::Null,
            (Method::Post, Some(Value::Object(body))) if !body.contains_key("id") => {
                let mut body = body.clone();
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                body.insert("id".into(), Value::from(id));
                Value::Object(body)
            }
            (_, Some(body)) => body.clone(),
            (_, None) => Value::Null,
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn call(&self, request: RemoteRequest) -> RemoteResult<Value> {
        self.calls.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let key = (request.method, request.path.clone());
        let delay = self
            .delays
            .lock()
            .get(&key)
            .copied()
            .or(*self.default_delay.lock());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::network("not connected"));
        }

        let rule = self.rules.lock().get(&key).cloned();
        match rule {
            Some(MockRule::Respond(body)) => Ok(body),
            Some(MockRule::Fail(err)) => Err(err),
            None => Ok(self.default_response(&request)),
        }
    }
}
