//! Bounded pool of tenant-bound sessions.
//!
//! Checkout is exclusive: a [`PooledSession`] owns its session until it is
//! released or dropped. Only released sessions re-enter the idle list, and
//! release always runs the binder's reset first. A guard dropped without
//! release (e.g. the request was cancelled) discards its session instead of
//! pooling it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::binder::TenantBoundSession;
use super::factory::TenantBindingFactory;
use crate::traits::{DatabaseSession, SessionError};

/// Pool sizing and checkout behaviour.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of sessions checked out at once.
    pub max_size: usize,
    /// Maximum time `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Pool of [`TenantBoundSession`]s created through a [`TenantBindingFactory`].
pub struct SessionPool {
    factory: TenantBindingFactory,
    idle: Mutex<Vec<TenantBoundSession>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl SessionPool {
    #[must_use]
    pub fn new(factory: TenantBindingFactory, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            factory,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
        })
    }

    #[must_use]
    pub fn factory(&self) -> &TenantBindingFactory {
        &self.factory
    }

    /// Number of released sessions waiting for reuse.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of sessions currently checked out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.config.max_size - self.permits.available_permits()
    }

    /// Checks out a session, reusing an idle one when available.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PoolTimeout`] if no slot frees up within
    /// `acquire_timeout`, [`SessionError::PoolClosed`] after [`close`](Self::close),
    /// or the factory's error when a new session cannot be opened.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledSession, SessionError> {
        let timeout = self.config.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(SessionError::PoolClosed),
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = timeout.as_millis() as u64;
                return Err(SessionError::PoolTimeout { timeout_ms });
            }
        };

        let reused = self.idle.lock().pop();
        let session = match reused {
            Some(session) => session,
            None => {
                debug!("opening new pooled session");
                self.factory.create_bound().await?
            }
        };

        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Stops handing out sessions and drops the idle ones.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    fn put_back(&self, session: TenantBoundSession) {
        if self.permits.is_closed() {
            return;
        }
        self.idle.lock().push(session);
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Exclusive checkout of one session. Derefs to [`TenantBoundSession`].
pub struct PooledSession {
    session: Option<TenantBoundSession>,
    pool: Arc<SessionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Runs the binder's guarded release and returns the session to the pool.
    ///
    /// # Errors
    ///
    /// Returns the underlying session's release error; the session is then
    /// discarded rather than pooled.
    pub async fn release(mut self) -> Result<(), SessionError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        match session.release().await {
            Ok(()) => {
                self.pool.put_back(session);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "session release failed; discarding session");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledSession {
    type Target = TenantBoundSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("session present until release")
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("session present until release")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(state = ?session.state(), "pooled session dropped without release; discarding");
        }
    }
}
