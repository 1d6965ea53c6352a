//! SQLite-backed DataStore over the financial statements schema.
//!
//! Uses `rusqlite` in synchronous mode; queries run on the blocking pool so
//! the async Coordinator never stalls on disk I/O. Only read-only statements
//! are executed through the `DataStore` contract.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};

use super::errors::QueryError;
use super::DataStore;
use crate::agent_core::types::RowSet;

// ─── Store ──────────────────────────────────────────────────────────────────

/// SQLite database holding `companies`, `filings`, and `financials`.
#[derive(Debug, Clone)]
pub struct SqliteDataStore {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteDataStore {
    /// Open (or create) the store at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, QueryError> {
        let open_failed = |e: rusqlite::Error| QueryError::OpenFailed {
            path: path.to_string(),
            reason: e.to_string(),
        };
        let conn = Connection::open(path).map_err(open_failed)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(open_failed)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(open_failed)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the schema if it does not exist.
    pub fn create_schema(&self) -> Result<(), QueryError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                ticker TEXT UNIQUE,
                cik TEXT,
                sic TEXT,
                industry TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS filings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                filing_date TEXT,
                filing_type TEXT,
                filing_url TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (company_id) REFERENCES companies(id)
            );

            CREATE TABLE IF NOT EXISTS financials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                year INTEGER NOT NULL,
                line_item TEXT NOT NULL,
                value REAL,
                metadata TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (company_id) REFERENCES companies(id)
            );

            CREATE INDEX IF NOT EXISTS idx_financials_company
                ON financials(company_id, line_item, year);
            ",
        )?;
        Ok(())
    }

    /// Replace the store's contents with the demo dataset.
    ///
    /// Returns the number of `financials` rows written.
    pub fn seed_demo_data(&self) -> Result<usize, QueryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM financials; DELETE FROM filings; DELETE FROM companies;")?;

        let mut written = 0;
        for company in DEMO_COMPANIES {
            tx.execute(
                "INSERT INTO companies (name, ticker, cik, sic, industry) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    company.name,
                    company.ticker,
                    company.cik,
                    company.sic,
                    company.industry
                ],
            )?;
            let company_id = tx.last_insert_rowid();

            for (offset, year) in DEMO_YEARS.iter().enumerate() {
                tx.execute(
                    "INSERT INTO filings (company_id, filing_date, filing_type) VALUES (?1, ?2, '10-K')",
                    params![company_id, format!("{}-02-15", year + 1)],
                )?;
                let revenue = company.base_revenue * company.growth.powi(offset as i32);
                for (line_item, ratio) in DEMO_LINE_ITEMS {
                    let value = (revenue * ratio).round();
                    tx.execute(
                        "INSERT INTO financials (company_id, year, line_item, value) VALUES (?1, ?2, ?3, ?4)",
                        params![company_id, year, line_item, value],
                    )?;
                    written += 1;
                }
            }
        }

        tx.commit()?;
        tracing::info!(rows = written, path = %self.path, "datastore: seeded demo data");
        Ok(written)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, QueryError> {
        self.conn.lock().map_err(|e| QueryError::WorkerFailed {
            reason: format!("connection lock poisoned: {e}"),
        })
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn query(
        &self,
        expression: &str,
        params: &[serde_json::Value],
    ) -> Result<RowSet, QueryError> {
        let conn = Arc::clone(&self.conn);
        let expression = expression.to_string();
        let bound = params
            .iter()
            .enumerate()
            .map(|(index, value)| json_to_sql(index, value))
            .collect::<Result<Vec<_>, _>>()?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| QueryError::WorkerFailed {
                reason: format!("connection lock poisoned: {e}"),
            })?;
            run_query(&conn, &expression, &bound)
        })
        .await
        .map_err(|e| QueryError::WorkerFailed {
            reason: e.to_string(),
        })?
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn run_query(
    conn: &Connection,
    expression: &str,
    bound: &[SqlValue],
) -> Result<RowSet, QueryError> {
    let mut stmt = conn
        .prepare(expression)
        .map_err(|e| QueryError::InvalidQuery {
            reason: e.to_string(),
        })?;

    if !stmt.readonly() {
        return Err(QueryError::NotReadOnly);
    }

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();

    let mut rows = stmt.query(params_from_iter(bound.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for i in 0..width {
            record.push(sql_to_json(row.get_ref(i)?));
        }
        out.push(record);
    }

    Ok(RowSet::new(columns, out))
}

fn json_to_sql(index: usize, value: &serde_json::Value) -> Result<SqlValue, QueryError> {
    match value {
        serde_json::Value::Null => Ok(SqlValue::Null),
        serde_json::Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(QueryError::UnsupportedParam {
                    index,
                    reason: format!("number {n} does not fit in a SQLite value"),
                })
            }
        }
        serde_json::Value::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(QueryError::UnsupportedParam {
            index,
            reason: format!("cannot bind {} values", json_kind(other)),
        }),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
        _ => "scalar",
    }
}

// ─── Demo Data ──────────────────────────────────────────────────────────────

struct DemoCompany {
    name: &'static str,
    ticker: &'static str,
    cik: &'static str,
    sic: &'static str,
    industry: &'static str,
    base_revenue: f64,
    growth: f64,
}

const DEMO_COMPANIES: &[DemoCompany] = &[
    DemoCompany {
        name: "Acme Corporation",
        ticker: "ACME",
        cik: "0000320193",
        sic: "3571",
        industry: "Industrial Machinery",
        base_revenue: 1_200_000_000.0,
        growth: 1.08,
    },
    DemoCompany {
        name: "Globex Inc.",
        ticker: "GLBX",
        cik: "0000789019",
        sic: "7372",
        industry: "Software",
        base_revenue: 850_000_000.0,
        growth: 1.21,
    },
    DemoCompany {
        name: "Initech LLC",
        ticker: "INIT",
        cik: "0001018724",
        sic: "7389",
        industry: "Business Services",
        base_revenue: 430_000_000.0,
        growth: 0.88,
    },
];

const DEMO_YEARS: &[i64] = &[2020, 2021, 2022, 2023];

/// Line items as a fraction of the year's revenue.
const DEMO_LINE_ITEMS: &[(&str, f64)] = &[
    ("Revenue", 1.0),
    ("Net Income", 0.14),
    ("Operating Expenses", 0.71),
    ("Total Assets", 2.4),
    ("Total Liabilities", 1.3),
    ("Cash", 0.22),
];

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> SqliteDataStore {
        let store = SqliteDataStore::open(":memory:").unwrap();
        store.create_schema().unwrap();
        store
    }

    #[tokio::test]
    async fn test_seed_and_query() {
        let store = test_store();
        let written = store.seed_demo_data().unwrap();
        assert_eq!(
            written,
            DEMO_COMPANIES.len() * DEMO_YEARS.len() * DEMO_LINE_ITEMS.len()
        );

        let rows = store
            .query(
                "SELECT c.ticker, f.year, f.value FROM financials f \
                 JOIN companies c ON c.id = f.company_id \
                 WHERE f.line_item = ?1 AND c.ticker = ?2 ORDER BY f.year",
                &[json!("Revenue"), json!("ACME")],
            )
            .await
            .unwrap();

        assert_eq!(rows.columns, vec!["ticker", "year", "value"]);
        assert_eq!(rows.len(), DEMO_YEARS.len());
        assert_eq!(rows.rows[0][0], json!("ACME"));
        assert_eq!(rows.rows[0][1], json!(2020));
        assert_eq!(rows.rows[0][2], json!(1_200_000_000.0));
    }

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let store = test_store();
        store.seed_demo_data().unwrap();
        store.seed_demo_data().unwrap();

        let rows = store
            .query("SELECT COUNT(*) AS n FROM companies", &[])
            .await
            .unwrap();
        assert_eq!(rows.rows[0][0], json!(DEMO_COMPANIES.len()));
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let store = test_store();
        let rows = store
            .query("SELECT * FROM financials WHERE year = ?1", &[json!(1900)])
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(rows.columns.contains(&"line_item".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_writes() {
        let store = test_store();
        let err = store
            .query("DELETE FROM financials", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotReadOnly));
    }

    #[tokio::test]
    async fn test_invalid_query() {
        let store = test_store();
        let err = store
            .query("SELECT * FROM no_such_table", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_param() {
        let store = test_store();
        let err = store
            .query("SELECT ?1", &[json!({"nested": true})])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedParam { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_value_conversion() {
        let store = test_store();
        let rows = store
            .query(
                "SELECT NULL AS a, 1 AS b, 2.5 AS c, 'x' AS d, x'0102' AS e, ?1 AS f",
                &[json!(true)],
            )
            .await
            .unwrap();
        assert_eq!(
            rows.rows[0],
            vec![
                json!(null),
                json!(1),
                json!(2.5),
                json!("x"),
                json!("<2 bytes>"),
                json!(1)
            ]
        );
    }

    #[test]
    fn test_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("store.db");
        let err = SqliteDataStore::open(bad.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, QueryError::OpenFailed { .. }));
    }
}
