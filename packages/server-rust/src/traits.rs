use async_trait::async_trait;
use tenantgate_core::TenantId;

/// Rows returned by a statement, decoded as text.
///
/// Each inner vector is one row; `None` is SQL `NULL` (or a column type the
/// backend does not render as text).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// First column of the first row, if present and non-null.
    #[must_use]
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// Errors surfaced by database sessions and the session pool.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The tenant bind statement failed; the caller's statement was not run.
    #[error("failed to bind tenant {tenant} on session: {source}")]
    Bind {
        tenant: TenantId,
        #[source]
        source: Box<SessionError>,
    },
    #[error("timed out after {timeout_ms}ms waiting for a pooled session")]
    PoolTimeout { timeout_ms: u64 },
    #[error("session pool is closed")]
    PoolClosed,
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// One physical database connection as seen by the request pipeline.
///
/// The only capabilities consumed are running a parameterized statement and
/// handing the session back to whatever pool owns it. Parameters are bound
/// as text.
///
/// Used as `Box<dyn DatabaseSession>`.
#[async_trait]
pub trait DatabaseSession: Send {
    /// Run `statement` with positional text parameters (`$1`, `$2`, ...).
    async fn query(&mut self, statement: &str, params: &[String]) -> Result<QueryResult, SessionError>;

    /// Finish the current checkout. The owning pool may hand the session to
    /// another request afterwards.
    async fn release(&mut self) -> Result<(), SessionError>;
}

/// Produces new physical sessions for a pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session.
    async fn create(&self) -> Result<Box<dyn DatabaseSession>, SessionError>;
}
