//! Execution context types.
//!
//! The [`Context`] is the single cancellation signal that flows from the
//! transport adapter through middleware and handlers into the repository and
//! message client. It also carries the authenticated [`Principal`] used for
//! audit stamping.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-call identifier, a UUID v7 so ids sort by arrival time.
///
/// Unlike the correlation id it is never propagated to other services.
///
/// ```
/// use keystone_core::RequestId;
///
/// let first = RequestId::new();
/// let second = RequestId::new();
/// assert_ne!(first, second);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The authenticated caller of a request.
///
/// Middleware attaches a principal after authenticating the call; the
/// repository reads it to stamp `created_by`/`updated_by`/`deleted_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier of the caller (user id, service id).
    pub id: String,

    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Roles granted to the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl Principal {
    /// Creates a principal with the given id and no roles.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            roles: Vec::new(),
        }
    }

    /// Returns a principal with the given display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns a principal with an additional role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Returns `true` if the principal holds the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Cancellable per-call execution context.
///
/// `Context` carries:
/// - Unique request ID for tracing
/// - Correlation ID propagated across services
/// - The authenticated principal, if any
/// - A cancellation token and an optional deadline
///
/// Cloning a context shares its cancellation token; use [`Context::child`]
/// to derive a context that can be cancelled independently of its parent.
///
/// # Example
///
/// ```
/// use keystone_core::{Context, Principal};
///
/// let ctx = Context::new().with_principal(Principal::new("user-1"));
/// assert_eq!(ctx.principal().map(|p| p.id.as_str()), Some("user-1"));
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    request_id: RequestId,
    correlation_id: Option<String>,
    principal: Option<Principal>,
    token: CancellationToken,
    deadline: Option<tokio::time::Instant>,
    started_at: Instant,
}

impl Context {
    /// Creates a new root context with a fresh request ID and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            correlation_id: None,
            principal: None,
            token: CancellationToken::new(),
            deadline: None,
            started_at: Instant::now(),
        }
    }

    /// Creates a context bound to an existing cancellation token.
    ///
    /// Used by services to tie every request to the service's own shutdown.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::new()
        }
    }

    /// Creates a mock context for testing purposes.
    #[must_use]
    pub fn mock() -> Self {
        Self::new()
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the correlation ID if set.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Sets the correlation ID.
    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.correlation_id = Some(id.into());
    }

    /// Returns a new context with the specified correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Returns the authenticated principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Sets the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Returns a new context with the specified principal.
    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Returns a new context whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = tokio::time::Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Returns the deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, or `None` without one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }

    /// Returns how long ago this context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the underlying cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the context is cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .is_some_and(|d| d <= tokio::time::Instant::now())
    }

    /// Completes when the context is cancelled or its deadline elapses.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Derives a child context.
    ///
    /// The child shares identity, correlation and deadline. Cancelling the
    /// parent cancels the child; cancelling the child leaves the parent alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            correlation_id: self.correlation_id.clone(),
            principal: self.principal.clone(),
            token: self.token.child_token(),
            deadline: self.deadline,
            started_at: self.started_at,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_request_id_display() {
        let uuid = Uuid::nil();
        let id = RequestId::from_uuid(uuid);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_principal_roles() {
        let p = Principal::new("u1").with_role("admin").with_name("Ada");
        assert!(p.has_role("admin"));
        assert!(!p.has_role("viewer"));
        assert_eq!(p.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_context_builders() {
        let ctx = Context::new()
            .with_correlation_id("corr-1")
            .with_principal(Principal::new("u1"));
        assert_eq!(ctx.correlation_id(), Some("corr-1"));
        assert_eq!(ctx.principal().map(|p| p.id.as_str()), Some("u1"));
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_child_only_downward() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let first = ctx.deadline();
        let ctx = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolves_on_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancelled_wakes_child_on_parent_cancel() {
        let ctx = Context::new();
        let child = ctx.child();
        let mut waiter = tokio_test::task::spawn(child.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        ctx.cancel();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}
