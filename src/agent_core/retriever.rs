//! Retriever stage: natural-language request → query → rows.
//!
//! Translation and execution are separate seams (`QueryTranslator` and
//! `DataStore`); both failure points surface as `StageError::Data`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use super::errors::{DataPhase, StageError};
use super::interpreter::keyword_score;
use super::types::{AgentMessage, Intent, MessageContent, Source};
use crate::datastore::DataStore;

/// Fetches rows for a request. Failures are returned as `error`-intent
/// messages.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: &str) -> AgentMessage;
}

// ─── Translation ────────────────────────────────────────────────────────────

/// A parameterized query ready for a `DataStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub expression: String,
    pub params: Vec<serde_json::Value>,
    /// Certainty that the expression captures the request.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct TranslationError {
    pub reason: String,
}

/// Converts a request into a query expression.
pub trait QueryTranslator: Send + Sync {
    fn translate(&self, request: &str) -> Result<Translation, TranslationError>;
}

/// Financial vocabulary → `financials.line_item` values.
const LINE_ITEMS: &[(&[&str], &str)] = &[
    (&["revenue", "sales", "top line", "turnover"], "Revenue"),
    (&["net income", "income", "profit", "earnings"], "Net Income"),
    (&["expense", "opex", "operating cost", "spending"], "Operating Expenses"),
    (&["asset"], "Total Assets"),
    (&["liabilit", "debt"], "Total Liabilities"),
    (&["cash"], "Cash"),
];

const RECENCY_TERMS: &[&str] = &["recent", "latest", "last", "newest", "current"];

/// Upper-case words that are never tickers.
const NOT_TICKERS: &[&str] = &["SQL", "USD", "YOY", "CSV", "ID", "EPS", "TTM"];

const SELECT_CLAUSE: &str = "SELECT c.ticker, c.name AS company, f.year, f.line_item, f.value \
FROM financials f JOIN companies c ON c.id = f.company_id";

const CONFIDENCE_BASE: f64 = 0.6;
const CONFIDENCE_PER_DIMENSION: f64 = 0.15;
const CONFIDENCE_CAP: f64 = 0.95;

/// Rule-based SQL templates over the `companies`/`financials` schema.
#[derive(Debug, Clone)]
pub struct TemplateTranslator {
    default_limit: u32,
    max_limit: u32,
}

impl TemplateTranslator {
    pub fn new(default_limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            default_limit: default_limit.clamp(1, max_limit),
            max_limit,
        }
    }
}

impl Default for TemplateTranslator {
    fn default() -> Self {
        Self::new(5, 100)
    }
}

impl QueryTranslator for TemplateTranslator {
    fn translate(&self, request: &str) -> Result<Translation, TranslationError> {
        let lower = request.to_lowercase();
        let words = tokenize(request);

        let line_items: Vec<&str> = LINE_ITEMS
            .iter()
            .filter(|(terms, _)| keyword_score(&lower, &[*terms]) > 0)
            .map(|(_, item)| *item)
            .collect();
        let tickers = extract_tickers(&words);

        if line_items.is_empty() && tickers.is_empty() {
            return Err(TranslationError {
                reason: "no financial line item or ticker recognized in request".into(),
            });
        }

        let year = words.iter().find_map(|w| parse_year(w));
        let recent = keyword_score(&lower, &[RECENCY_TERMS]) > 0;
        let requested_limit = extract_limit(&words);

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        let mut dimensions = 0u32;

        if !line_items.is_empty() {
            clauses.push(format!("f.line_item IN ({})", placeholders(line_items.len())));
            params.extend(line_items.iter().map(|item| json!(item)));
            dimensions += 1;
        }
        if !tickers.is_empty() {
            clauses.push(format!("c.ticker IN ({})", placeholders(tickers.len())));
            params.extend(tickers.iter().map(|t| json!(t)));
            dimensions += 1;
        }
        if let Some(year) = year {
            clauses.push("f.year = ?".to_string());
            params.push(json!(year));
            dimensions += 1;
        }
        if recent || requested_limit.is_some() {
            dimensions += 1;
        }

        let order = if recent {
            "f.year DESC, c.ticker, f.line_item"
        } else {
            "c.ticker, f.line_item, f.year"
        };
        let limit = requested_limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);
        params.push(json!(limit));

        let expression = format!(
            "{SELECT_CLAUSE} WHERE {} ORDER BY {order} LIMIT ?",
            clauses.join(" AND ")
        );
        let confidence =
            (CONFIDENCE_BASE + CONFIDENCE_PER_DIMENSION * f64::from(dimensions)).min(CONFIDENCE_CAP);

        Ok(Translation {
            expression,
            params,
            confidence,
        })
    }
}

// ─── StoreRetriever ─────────────────────────────────────────────────────────

/// Retriever composed of a translator and a DataStore.
#[derive(Clone)]
pub struct StoreRetriever {
    translator: Arc<dyn QueryTranslator>,
    store: Arc<dyn DataStore>,
}

impl StoreRetriever {
    pub fn new(translator: Arc<dyn QueryTranslator>, store: Arc<dyn DataStore>) -> Self {
        Self { translator, store }
    }
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(&self, request: &str) -> AgentMessage {
        let translation = match self.translator.translate(request) {
            Ok(t) => t,
            Err(e) => {
                return AgentMessage::failure(
                    Source::Retriever,
                    StageError::Data {
                        phase: DataPhase::Translation,
                        reason: e.reason,
                    },
                );
            }
        };

        match self
            .store
            .query(&translation.expression, &translation.params)
            .await
        {
            Ok(rows) => {
                tracing::debug!(
                    rows = rows.len(),
                    confidence = translation.confidence,
                    "retriever: query returned"
                );
                AgentMessage::new(
                    Source::Retriever,
                    Intent::Query,
                    MessageContent::Rows(rows),
                    translation.confidence,
                )
            }
            Err(e) => AgentMessage::failure(
                Source::Retriever,
                StageError::Data {
                    phase: DataPhase::Execution,
                    reason: e.to_string(),
                },
            ),
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn tokenize(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn extract_tickers(words: &[String]) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for word in words {
        let is_ticker = (2..=5).contains(&word.len())
            && word.chars().all(|c| c.is_ascii_uppercase())
            && !NOT_TICKERS.contains(&word.as_str());
        if is_ticker && !tickers.contains(word) {
            tickers.push(word.clone());
        }
    }
    tickers
}

fn parse_year(word: &str) -> Option<i64> {
    if word.len() != 4 {
        return None;
    }
    word.parse::<i64>()
        .ok()
        .filter(|y| (1900..=2100).contains(y))
}

/// `top N`, `last N`, `first N`, `latest N`.
fn extract_limit(words: &[String]) -> Option<u32> {
    words.windows(2).find_map(|pair| {
        let lead = pair[0].to_lowercase();
        if matches!(lead.as_str(), "top" | "last" | "first" | "latest") {
            pair[1].parse::<u32>().ok().filter(|n| *n > 0 && parse_year(&pair[1]).is_none())
        } else {
            None
        }
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::RowSet;
    use crate::datastore::{QueryError, SqliteDataStore};

    struct FailingStore;

    #[async_trait]
    impl DataStore for FailingStore {
        async fn query(
            &self,
            _expression: &str,
            _params: &[serde_json::Value],
        ) -> Result<RowSet, QueryError> {
            Err(QueryError::ExecutionFailed {
                reason: "database is locked".into(),
            })
        }
    }

    fn seeded_retriever() -> StoreRetriever {
        let store = SqliteDataStore::open(":memory:").unwrap();
        store.create_schema().unwrap();
        store.seed_demo_data().unwrap();
        StoreRetriever::new(Arc::new(TemplateTranslator::default()), Arc::new(store))
    }

    #[test]
    fn translates_recent_revenue() {
        let t = TemplateTranslator::default()
            .translate("show me recent revenue")
            .unwrap();
        assert!(t.expression.contains("f.line_item IN (?)"));
        assert!(t.expression.contains("ORDER BY f.year DESC"));
        assert_eq!(t.params, vec![json!("Revenue"), json!(5)]);
        assert!((t.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn translates_ticker_year_and_limit() {
        let t = TemplateTranslator::default()
            .translate("top 3 net income and cash for ACME in 2022")
            .unwrap();
        assert_eq!(
            t.params,
            vec![
                json!("Net Income"),
                json!("Cash"),
                json!("ACME"),
                json!(2022),
                json!(3)
            ]
        );
        assert_eq!(t.confidence, CONFIDENCE_CAP);
    }

    #[test]
    fn limit_is_capped() {
        let t = TemplateTranslator::new(5, 10)
            .translate("top 500 revenue rows")
            .unwrap();
        assert_eq!(t.params.last(), Some(&json!(10)));
    }

    #[test]
    fn untranslatable_request_fails() {
        let err = TemplateTranslator::default()
            .translate("make it look nice")
            .unwrap_err();
        assert!(err.reason.contains("no financial line item"));
    }

    #[test]
    fn tickers_ignore_stopwords() {
        let words = tokenize("Compare GLBX, INIT and I in USD");
        assert_eq!(extract_tickers(&words), vec!["GLBX", "INIT"]);
    }

    #[tokio::test]
    async fn retrieves_rows_from_store() {
        let msg = seeded_retriever().retrieve("show me recent revenue").await;
        assert_eq!(msg.intent(), Intent::Query);
        assert_eq!(msg.source(), Source::Retriever);
        let rows = msg.rows().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(
            rows.columns,
            vec!["ticker", "company", "year", "line_item", "value"]
        );
        assert_eq!(rows.rows[0][2], json!(2023));
    }

    #[tokio::test]
    async fn empty_result_keeps_translation_confidence() {
        let msg = seeded_retriever().retrieve("revenue for ZZZZ").await;
        assert_eq!(msg.intent(), Intent::Query);
        assert!(msg.rows().unwrap().is_empty());
        assert!((msg.confidence() - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn translation_failure_is_data_error() {
        let msg = seeded_retriever().retrieve("hello there").await;
        assert_eq!(msg.intent(), Intent::Error);
        assert!(matches!(
            msg.failure_cause(),
            Some(StageError::Data {
                phase: DataPhase::Translation,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn execution_failure_is_data_error() {
        let retriever =
            StoreRetriever::new(Arc::new(TemplateTranslator::default()), Arc::new(FailingStore));
        let msg = retriever.retrieve("show revenue").await;
        assert_eq!(msg.confidence(), 0.0);
        match msg.failure_cause() {
            Some(StageError::Data { phase, reason }) => {
                assert_eq!(*phase, DataPhase::Execution);
                assert!(reason.contains("locked"));
            }
            other => panic!("expected data error, got {other:?}"),
        }
    }
}
