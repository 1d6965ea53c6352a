//! DataStore contract and the SQLite-backed implementation.
//!
//! The Retriever only ever talks to a `DataStore`; connection management,
//! locking, and dialect details stay behind this trait.

pub mod errors;
pub mod sqlite;

use async_trait::async_trait;

use crate::agent_core::types::RowSet;

pub use errors::QueryError;
pub use sqlite::SqliteDataStore;

/// Executes a query expression with bound parameters and returns rows.
///
/// Implementations serialize their own access; callers may share a single
/// store across concurrent Requests.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn query(
        &self,
        expression: &str,
        params: &[serde_json::Value],
    ) -> Result<RowSet, QueryError>;
}
