//! `PostgreSQL` sessions over `sqlx`.
//!
//! Each [`PgSession`] owns one `PgConnection`. [`SessionPool`](super::SessionPool)
//! is the only pool in play: releasing a `PgSession` keeps the connection
//! open so the pool can hand it to the next request.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Row};

use crate::traits::{DatabaseSession, QueryResult, SessionError, SessionFactory};

/// Opens one `PgConnection` per session.
#[derive(Debug, Clone)]
pub struct PgSessionFactory {
    options: PgConnectOptions,
}

impl PgSessionFactory {
    #[must_use]
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    /// Parses a `postgres://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Database`] if the URL is malformed.
    pub fn from_url(url: &str) -> Result<Self, SessionError> {
        let options: PgConnectOptions = url
            .parse()
            .map_err(|e: sqlx::Error| SessionError::Database(e.into()))?;
        Ok(Self::new(options))
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn create(&self) -> Result<Box<dyn DatabaseSession>, SessionError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| SessionError::Database(e.into()))?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// One physical `PostgreSQL` connection.
#[derive(Debug)]
pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl DatabaseSession for PgSession {
    async fn query(&mut self, statement: &str, params: &[String]) -> Result<QueryResult, SessionError> {
        let mut query = sqlx::query(statement);
        for param in params {
            query = query.bind(param.as_str());
        }
        let rows = query
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| SessionError::Database(e.into()))?;
        Ok(QueryResult {
            rows: rows.iter().map(decode_row).collect(),
        })
    }

    async fn release(&mut self) -> Result<(), SessionError> {
        // The connection stays open; the owning pool decides its lifetime.
        Ok(())
    }
}

/// Renders each column as text. Types without a text rendering here become `None`.
fn decode_row(row: &PgRow) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                return v;
            }
            if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                return v.map(|n| n.to_string());
            }
            if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
                return v.map(|n| n.to_string());
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                return v.map(|n| n.to_string());
            }
            if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                return v.map(|b| b.to_string());
            }
            None
        })
        .collect()
}
