//! Session context and liveness.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// School administrator.
    Admin,
    /// Teacher.
    Teacher,
    /// Student.
    Student,
}

impl Role {
    /// Parses the role names the API uses.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Identity and credentials of the signed-in user.
///
/// Passed explicitly to the remote client at construction; nothing in the
/// engine reads credentials from ambient storage.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Bearer token.
    pub token: String,
    /// User id as known to the API.
    pub user_id: String,
    /// Role of the user.
    pub role: Role,
}

impl SessionContext {
    /// Creates a session context.
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            role,
        }
    }

    /// Returns the `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug)]
struct LivenessInner {
    alive: AtomicBool,
    killed: Notify,
}

/// Liveness flag of a screen or session.
///
/// Clones share the flag. Once killed, results of in-flight calls are
/// discarded instead of being applied to a store nobody observes.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<LivenessInner>);

impl Liveness {
    /// Creates a live flag.
    pub fn new() -> Self {
        Self(Arc::new(LivenessInner {
            alive: AtomicBool::new(true),
            killed: Notify::new(),
        }))
    }

    /// Returns true until [`kill`](Self::kill) is called.
    pub fn is_alive(&self) -> bool {
        self.0.alive.load(Ordering::SeqCst)
    }

    /// Marks the owner as torn down and wakes every [`killed`](Self::killed)
    /// waiter. Irreversible.
    pub fn kill(&self) {
        self.0.alive.store(false, Ordering::SeqCst);
        self.0.killed.notify_waiters();
    }

    /// Resolves once the flag is killed; immediately if it already is.
    pub async fn killed(&self) {
        // Registered before the check so a concurrent kill is not missed.
        let notified = self.0.killed.notified();
        if !self.is_alive() {
            return;
        }
        notified.await;
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
