//! Collaborator traits for the authenticated source
//!
//! The engine never talks to a remote source directly. Site-specific login
//! and extraction logic live behind these two traits, injected as `Arc<dyn>`
//! trait objects at construction. Both share a `Session` associated type so
//! an engine instance is only well-formed when its authenticator and
//! extractor agree on the session handle they exchange.

use crate::error::{AuthError, ExtractError};
use crate::types::{Record, Task};
use async_trait::async_trait;

/// Produces and destroys authenticated sessions
///
/// One session is exclusively owned by one worker at a time. The engine
/// calls `login` when a worker starts or recovers from a session loss, and
/// `logout` when the worker stops or discards a broken session.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use harvester::{AuthError, Authenticator};
///
/// struct TokenAuth;
///
/// #[async_trait]
/// impl Authenticator for TokenAuth {
///     type Session = String;
///
///     async fn login(&self) -> Result<String, AuthError> {
///         Ok("session-token".into())
///     }
///
///     async fn logout(&self, _session: String) {}
/// }
/// ```
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticated session handle produced by a successful login
    type Session: Send + 'static;

    /// Establish a new authenticated session
    ///
    /// # Errors
    ///
    /// Returns an error if the source rejects the credentials or the login
    /// flow cannot complete. Workers treat any login error as retryable and
    /// back off before the next attempt.
    async fn login(&self) -> Result<Self::Session, AuthError>;

    /// Release a session
    ///
    /// Best-effort and infallible: implementations swallow their own
    /// failures (at most logging them) so that a broken session can never
    /// prevent a worker from recovering or shutting down.
    async fn logout(&self, session: Self::Session);

    /// Clean up sessions orphaned by abnormal worker exits
    ///
    /// Invoked exactly once at the end of shutdown, after all workers have
    /// been joined. Implementations backed by external session-holding
    /// processes can kill leftovers here. The default does nothing.
    async fn reap_orphaned_sessions(&self) {}
}

/// Extracts the record for one task using an authenticated session
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Session type this extractor operates on
    ///
    /// Must match the [`Authenticator::Session`] of the authenticator it is
    /// paired with.
    type Session: Send + 'static;

    /// Extract the record for `task`
    ///
    /// Terminal outcomes that are not errors of the extraction itself
    /// (item not found, timed out, unavailable) are expressed as
    /// `Ok(Record)` with the corresponding [`crate::RecordStatus`].
    ///
    /// # Errors
    ///
    /// - [`ExtractError::SessionLost`]: the session expired or was
    ///   invalidated. The worker re-queues the task, discards the session
    ///   and re-authenticates; the task will be retried.
    /// - [`ExtractError::Failed`]: the extraction itself failed. The worker
    ///   emits a hard-error record for the task and moves on; the task is
    ///   not retried.
    async fn extract(
        &self,
        session: &mut Self::Session,
        task: &Task,
    ) -> Result<Record, ExtractError>;
}
