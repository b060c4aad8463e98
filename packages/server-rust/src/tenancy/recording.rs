//! In-memory [`DatabaseSession`] that records every statement it receives.
//!
//! [`RecordingFactory`] hands out [`RecordingSession`]s that share one
//! [`RecordingLog`]. Each session simulates a single session-scoped setting:
//! a `SELECT set_config(...)` statement stores its first parameter, a
//! `RESET ...` statement clears it, and every statement answers with one row
//! holding the setting as it was when the statement ran. Tests use that row
//! to check which tenant a query actually executed under.
//!
//! Failures can be injected by statement substring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::traits::{DatabaseSession, QueryResult, SessionError, SessionFactory};

/// One observed call on a recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Query {
        session: u64,
        statement: String,
        params: Vec<String>,
        /// Setting in effect while the statement ran (after it, for `set`/`reset`).
        observed: Option<String>,
        failed: bool,
    },
    Release {
        session: u64,
    },
}

impl SessionEvent {
    /// Session id the event belongs to.
    #[must_use]
    pub fn session(&self) -> u64 {
        match self {
            Self::Query { session, .. } | Self::Release { session } => *session,
        }
    }

    /// Statement text for query events.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::Query { statement, .. } => Some(statement),
            Self::Release { .. } => None,
        }
    }
}

/// Shared event log and failure switches.
#[derive(Debug, Default)]
pub struct RecordingLog {
    events: Mutex<Vec<SessionEvent>>,
    failing: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl RecordingLog {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all events so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    /// Statements (successful or not) issued on `session`, in order.
    #[must_use]
    pub fn statements_for(&self, session: u64) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.session() == session)
            .filter_map(|e| e.statement().map(str::to_string))
            .collect()
    }

    /// Number of query events whose statement contains `needle`.
    #[must_use]
    pub fn count_containing(&self, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.statement().is_some_and(|s| s.contains(needle)))
            .count()
    }

    /// Make every statement containing `needle` fail until cleared.
    pub fn fail_statements_containing(&self, needle: impl Into<String>) {
        self.failing.lock().push(needle.into());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn should_fail(&self, statement: &str) -> bool {
        self.failing.lock().iter().any(|n| statement.contains(n.as_str()))
    }

    fn push(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

/// Factory producing [`RecordingSession`]s with sequential ids starting at 1.
#[derive(Debug, Clone)]
pub struct RecordingFactory {
    log: Arc<RecordingLog>,
}

impl RecordingFactory {
    #[must_use]
    pub fn new(log: Arc<RecordingLog>) -> Self {
        Self { log }
    }

    /// Creates a session directly, bypassing the trait object.
    #[must_use]
    pub fn session(&self) -> RecordingSession {
        let id = self.log.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        RecordingSession {
            id,
            log: Arc::clone(&self.log),
            setting: None,
        }
    }
}

#[async_trait]
impl SessionFactory for RecordingFactory {
    async fn create(&self) -> Result<Box<dyn DatabaseSession>, SessionError> {
        if self.log.should_fail("<connect>") {
            return Err(SessionError::Database(anyhow::anyhow!("injected connect failure")));
        }
        Ok(Box::new(self.session()))
    }
}

/// Simulated physical session; see the module docs.
#[derive(Debug)]
pub struct RecordingSession {
    id: u64,
    log: Arc<RecordingLog>,
    setting: Option<String>,
}

impl RecordingSession {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current value of the simulated session setting.
    #[must_use]
    pub fn setting(&self) -> Option<&str> {
        self.setting.as_deref()
    }
}

#[async_trait]
impl DatabaseSession for RecordingSession {
    async fn query(&mut self, statement: &str, params: &[String]) -> Result<QueryResult, SessionError> {
        let failed = self.log.should_fail(statement);
        if !failed {
            let lowered = statement.trim_start().to_ascii_lowercase();
            if lowered.starts_with("select set_config(") {
                self.setting = params.first().cloned();
            } else if lowered.starts_with("reset ") {
                self.setting = None;
            }
        }

        self.log.push(SessionEvent::Query {
            session: self.id,
            statement: statement.to_string(),
            params: params.to_vec(),
            observed: self.setting.clone(),
            failed,
        });

        if failed {
            return Err(SessionError::Database(anyhow::anyhow!(
                "injected failure for statement: {statement}"
            )));
        }
        Ok(QueryResult {
            rows: vec![vec![self.setting.clone()]],
        })
    }

    async fn release(&mut self) -> Result<(), SessionError> {
        self.log.push(SessionEvent::Release { session: self.id });
        if self.log.should_fail("<release>") {
            return Err(SessionError::Database(anyhow::anyhow!("injected release failure")));
        }
        Ok(())
    }
}
