//! Analyzer stage: derived metrics and insights over retrieved rows.
//!
//! Pure computation: no I/O, no clock, no randomness. The Coordinator runs
//! it on the blocking pool so a slow analysis cannot stall the runtime.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::errors::StageError;
use super::types::{
    AgentMessage, AnalysisReport, Insight, InsightKind, Intent, MessageContent, RowSet, Severity,
    Source,
};

/// Context handed to the Analyzer alongside the rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisContext {
    pub original_input: String,
}

impl AnalysisContext {
    pub fn new(original_input: &str) -> Self {
        Self {
            original_input: original_input.to_string(),
        }
    }
}

/// Derives an `AnalysisReport` from rows. Must not perform I/O.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, rows: &RowSet, context: &AnalysisContext) -> AgentMessage;
}

// ─── Constants ──────────────────────────────────────────────────────────────

/// Confidence for an empty result: "nothing found" is not a failure.
pub const EMPTY_CONFIDENCE: f64 = 0.3;
const SMALL_SAMPLE_CONFIDENCE: f64 = 0.75;
const FULL_CONFIDENCE: f64 = 0.9;
/// Rows needed before the Analyzer reports full confidence.
const FULL_SAMPLE_ROWS: usize = 3;
/// Values needed per measure before deviations are computed.
const MIN_DEVIATION_SAMPLE: usize = 3;

const PERIOD_COLUMNS: &[&str] = &["year", "fiscal_year", "period", "quarter", "date"];

static NO_PERIOD: serde_json::Value = serde_json::Value::Null;

// ─── SummaryAnalyzer ────────────────────────────────────────────────────────

/// Totals, averages, per-series trends, and deviations from the median.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryAnalyzer;

impl SummaryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn report(&self, rows: &RowSet, context: &AnalysisContext) -> Result<AnalysisReport, StageError> {
        if let Some(index) = rows.first_ragged_row() {
            return Err(StageError::Analysis {
                reason: format!(
                    "row {index} has {} values but the header has {} columns",
                    rows.rows[index].len(),
                    rows.columns.len()
                ),
            });
        }

        if rows.is_empty() {
            return Ok(AnalysisReport {
                summary: format!("No data found for \"{}\".", context.original_input),
                insights: Vec::new(),
                recommendations: Vec::new(),
                row_count: 0,
            });
        }

        let layout = ColumnLayout::detect(rows);
        if layout.measures.is_empty() {
            return Ok(AnalysisReport {
                summary: format!(
                    "Retrieved {} rows for \"{}\" with no numeric columns to analyze.",
                    rows.len(),
                    context.original_input
                ),
                insights: Vec::new(),
                recommendations: Vec::new(),
                row_count: rows.len(),
            });
        }

        let mut insights = Vec::new();
        for &measure in &layout.measures {
            insights.extend(aggregate_insights(rows, measure)?);
            insights.extend(trend_insights(rows, &layout, measure));
            insights.extend(deviation_insights(rows, &layout, measure));
        }

        let recommendations = recommendations_for(&insights);
        let flagged = insights
            .iter()
            .filter(|i| i.severity == Severity::High)
            .count();
        let measure_names: Vec<&str> = layout
            .measures
            .iter()
            .map(|&m| rows.columns[m].as_str())
            .collect();

        Ok(AnalysisReport {
            summary: format!(
                "Analyzed {} rows of {} for \"{}\": {} insight(s), {} flagged high severity.",
                rows.len(),
                measure_names.join(", "),
                context.original_input,
                insights.len(),
                flagged
            ),
            insights,
            recommendations,
            row_count: rows.len(),
        })
    }
}

impl Analyzer for SummaryAnalyzer {
    fn analyze(&self, rows: &RowSet, context: &AnalysisContext) -> AgentMessage {
        match self.report(rows, context) {
            Ok(report) => {
                let confidence = match report.row_count {
                    0 => EMPTY_CONFIDENCE,
                    n if n < FULL_SAMPLE_ROWS => SMALL_SAMPLE_CONFIDENCE,
                    _ => FULL_CONFIDENCE,
                };
                AgentMessage::new(
                    Source::Analyzer,
                    Intent::Analysis,
                    MessageContent::Analysis(report),
                    confidence,
                )
            }
            Err(e) => AgentMessage::failure(Source::Analyzer, e),
        }
    }
}

// ─── Column Detection ───────────────────────────────────────────────────────

struct ColumnLayout {
    period: Option<usize>,
    measures: Vec<usize>,
    /// Columns identifying a series (ticker, line item, ...).
    keys: Vec<usize>,
}

impl ColumnLayout {
    fn detect(rows: &RowSet) -> Self {
        let period = rows
            .columns
            .iter()
            .position(|c| PERIOD_COLUMNS.contains(&c.to_ascii_lowercase().as_str()));

        let mut measures = Vec::new();
        let mut keys = Vec::new();
        for (index, name) in rows.columns.iter().enumerate() {
            if Some(index) == period || is_id_column(name) {
                continue;
            }
            let mut non_null = rows.rows.iter().map(|r| &r[index]).filter(|v| !v.is_null());
            let mut any = false;
            let numeric = non_null.all(|v| {
                any = true;
                v.is_number()
            });
            if numeric && any {
                measures.push(index);
            } else {
                keys.push(index);
            }
        }

        Self {
            period,
            measures,
            keys,
        }
    }

    fn series_key(&self, row: &[serde_json::Value]) -> String {
        let parts: Vec<String> = self.keys.iter().map(|&k| display_value(&row[k])).collect();
        if parts.is_empty() {
            "all rows".to_string()
        } else {
            parts.join(" / ")
        }
    }
}

fn is_id_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id")
}

// ─── Insights ───────────────────────────────────────────────────────────────

fn measure_values(rows: &RowSet, measure: usize) -> Vec<f64> {
    rows.rows.iter().filter_map(|r| r[measure].as_f64()).collect()
}

fn aggregate_insights(rows: &RowSet, measure: usize) -> Result<Vec<Insight>, StageError> {
    let name = &rows.columns[measure];
    let values = measure_values(rows, measure);
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let total: f64 = values.iter().sum();
    if !total.is_finite() {
        return Err(StageError::Analysis {
            reason: format!("total of '{name}' is not finite"),
        });
    }
    let average = total / values.len() as f64;

    Ok(vec![
        Insight {
            kind: InsightKind::Total,
            subject: name.clone(),
            value: total,
            severity: Severity::Low,
            description: format!("Total {name} across {} rows is {total:.2}.", values.len()),
        },
        Insight {
            kind: InsightKind::Average,
            subject: name.clone(),
            value: average,
            severity: Severity::Low,
            description: format!("Average {name} is {average:.2}."),
        },
    ])
}

/// First-to-last relative change per series, ordered by period.
fn trend_insights(rows: &RowSet, layout: &ColumnLayout, measure: usize) -> Vec<Insight> {
    let name = &rows.columns[measure];
    let mut series: BTreeMap<String, Vec<(&serde_json::Value, f64)>> = BTreeMap::new();
    for row in &rows.rows {
        let Some(value) = row[measure].as_f64() else {
            continue;
        };
        let period = layout
            .period
            .map(|p| &row[p])
            .unwrap_or(&NO_PERIOD);
        series
            .entry(layout.series_key(row))
            .or_default()
            .push((period, value));
    }

    let mut insights = Vec::new();
    for (key, mut points) in series {
        if points.len() < 2 {
            continue;
        }
        if layout.period.is_some() {
            points.sort_by(|a, b| compare_periods(a.0, b.0));
        }
        let (first_period, first) = points[0];
        let (last_period, last) = points[points.len() - 1];
        if first == 0.0 {
            continue;
        }
        let change = (last - first) / first.abs();
        // Subnormal baselines overflow the ratio.
        if !change.is_finite() {
            continue;
        }
        let span = if layout.period.is_some() {
            format!(
                "from {} to {}",
                display_value(first_period),
                display_value(last_period)
            )
        } else {
            format!("over {} rows", points.len())
        };
        insights.push(Insight {
            kind: InsightKind::Trend,
            subject: format!("{key} {name}"),
            value: change,
            severity: Severity::from_relative_change(change),
            description: format!("{key} {name} changed by {:+.1}% {span}.", change * 100.0),
        });
    }
    insights
}

/// Values that sit far from the measure's median. Low-severity deviations
/// are omitted.
fn deviation_insights(rows: &RowSet, layout: &ColumnLayout, measure: usize) -> Vec<Insight> {
    let name = &rows.columns[measure];
    let values = measure_values(rows, measure);
    if values.len() < MIN_DEVIATION_SAMPLE {
        return Vec::new();
    }
    let center = median(&values);
    if center == 0.0 {
        return Vec::new();
    }

    rows.rows
        .iter()
        .filter_map(|row| {
            let value = row[measure].as_f64()?;
            let deviation = (value - center) / center.abs();
            if !deviation.is_finite() {
                return None;
            }
            let severity = Severity::from_relative_change(deviation);
            if severity == Severity::Low {
                return None;
            }
            let label = match layout.period {
                Some(p) => format!("{} {}", layout.series_key(row), display_value(&row[p])),
                None => layout.series_key(row),
            };
            Some(Insight {
                kind: InsightKind::Deviation,
                subject: format!("{label} {name}"),
                value: deviation,
                severity,
                description: format!(
                    "{label} {name} of {value:.2} is {:+.1}% from the median {center:.2}.",
                    deviation * 100.0
                ),
            })
        })
        .collect()
}

fn recommendations_for(insights: &[Insight]) -> Vec<String> {
    insights
        .iter()
        .filter(|i| i.severity == Severity::High)
        .filter_map(|i| match i.kind {
            InsightKind::Trend if i.value > 0.0 => Some(format!(
                "Investigate what drove {} up {:.0}%.",
                i.subject,
                i.value * 100.0
            )),
            InsightKind::Trend => Some(format!(
                "Review the {:.0}% decline in {}.",
                i.value.abs() * 100.0,
                i.subject
            )),
            InsightKind::Deviation => Some(format!(
                "Verify {}: it deviates {:.0}% from the median.",
                i.subject,
                i.value.abs() * 100.0
            )),
            _ => None,
        })
        .collect()
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn compare_periods(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => display_value(a).cmp(&display_value(b)),
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new("show me recent revenue")
    }

    fn revenue_rows() -> RowSet {
        RowSet::new(
            vec!["ticker".into(), "year".into(), "value".into()],
            vec![
                vec![json!("ACME"), json!(2023), json!(160.0)],
                vec![json!("ACME"), json!(2021), json!(100.0)],
                vec![json!("ACME"), json!(2022), json!(120.0)],
                vec![json!("INIT"), json!(2021), json!(100.0)],
                vec![json!("INIT"), json!(2023), json!(90.0)],
            ],
        )
    }

    fn report(msg: &AgentMessage) -> &AnalysisReport {
        msg.analysis().expect("analysis content")
    }

    #[test]
    fn zero_rows_is_low_confidence_not_error() {
        let rows = RowSet::new(vec!["ticker".into(), "value".into()], vec![]);
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        assert_eq!(msg.intent(), Intent::Analysis);
        assert_eq!(msg.confidence(), EMPTY_CONFIDENCE);
        let r = report(&msg);
        assert!(r.insights.is_empty());
        assert!(r.recommendations.is_empty());
        assert!(r.summary.contains("No data found"));
        assert_eq!(r.row_count, 0);
    }

    #[test]
    fn totals_and_averages() {
        let msg = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        assert_eq!(msg.confidence(), FULL_CONFIDENCE);
        let r = report(&msg);
        let total = r
            .insights
            .iter()
            .find(|i| i.kind == InsightKind::Total)
            .unwrap();
        assert_eq!(total.subject, "value");
        assert_eq!(total.value, 570.0);
        let average = r
            .insights
            .iter()
            .find(|i| i.kind == InsightKind::Average)
            .unwrap();
        assert_eq!(average.value, 114.0);
    }

    #[test]
    fn trends_follow_period_order() {
        let msg = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        let trends: Vec<&Insight> = report(&msg)
            .insights
            .iter()
            .filter(|i| i.kind == InsightKind::Trend)
            .collect();
        assert_eq!(trends.len(), 2);

        let acme = trends.iter().find(|i| i.subject == "ACME value").unwrap();
        assert!((acme.value - 0.6).abs() < 1e-9);
        assert_eq!(acme.severity, Severity::High);
        assert!(acme.description.contains("from 2021 to 2023"));

        let init = trends.iter().find(|i| i.subject == "INIT value").unwrap();
        assert!((init.value + 0.1).abs() < 1e-9);
        assert_eq!(init.severity, Severity::Low);
    }

    #[test]
    fn high_severity_produces_recommendation() {
        let msg = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        let r = report(&msg);
        assert!(r
            .recommendations
            .iter()
            .any(|rec| rec.contains("ACME value") && rec.contains("60%")));
    }

    #[test]
    fn deviations_from_median() {
        // Median 100; 160 is +60% (high), 90 is -10% (omitted).
        let msg = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        let deviations: Vec<&Insight> = report(&msg)
            .insights
            .iter()
            .filter(|i| i.kind == InsightKind::Deviation)
            .collect();
        assert_eq!(deviations.len(), 1);
        assert_eq!(deviations[0].subject, "ACME 2023 value");
        assert_eq!(deviations[0].severity, Severity::High);
    }

    #[test]
    fn small_samples_lower_confidence() {
        let rows = RowSet::new(
            vec!["ticker".into(), "value".into()],
            vec![vec![json!("ACME"), json!(1.0)]],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        assert_eq!(msg.confidence(), SMALL_SAMPLE_CONFIDENCE);
    }

    #[test]
    fn id_and_text_columns_are_not_measures() {
        let rows = RowSet::new(
            vec!["company_id".into(), "name".into()],
            vec![
                vec![json!(1), json!("Acme")],
                vec![json!(2), json!("Globex")],
            ],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        let r = report(&msg);
        assert!(r.insights.is_empty());
        assert!(r.summary.contains("no numeric columns"));
    }

    #[test]
    fn ragged_rows_fail() {
        let rows = RowSet::new(
            vec!["a".into(), "b".into()],
            vec![vec![json!(1), json!(2)], vec![json!(3)]],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        assert_eq!(msg.intent(), Intent::Error);
        assert_eq!(msg.source(), Source::Analyzer);
        assert!(matches!(
            msg.failure_cause(),
            Some(StageError::Analysis { .. })
        ));
    }

    #[test]
    fn non_finite_total_fails() {
        let rows = RowSet::new(
            vec!["value".into()],
            vec![vec![json!(f64::MAX)], vec![json!(f64::MAX)]],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        assert!(matches!(
            msg.failure_cause(),
            Some(StageError::Analysis { .. })
        ));
    }

    #[test]
    fn overflowing_ratios_are_skipped() {
        let rows = RowSet::new(
            vec!["ticker".into(), "year".into(), "value".into()],
            vec![
                vec![json!("ACME"), json!(2021), json!(1e-310)],
                vec![json!("ACME"), json!(2022), json!(2e-310)],
                vec![json!("ACME"), json!(2023), json!(1e300)],
            ],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        assert_eq!(msg.intent(), Intent::Analysis);

        let r = report(&msg);
        assert!(r.insights.iter().all(|i| i.value.is_finite()));
        assert!(!r.insights.iter().any(|i| i.kind == InsightKind::Trend));
        assert!(r
            .insights
            .iter()
            .any(|i| i.kind == InsightKind::Deviation && i.subject.contains("2021")));

        let stored = serde_json::to_string(&msg).unwrap();
        let reloaded: AgentMessage = serde_json::from_str(&stored).unwrap();
        assert_eq!(report(&reloaded).insights.len(), r.insights.len());
    }

    #[test]
    fn two_point_trend_with_subnormal_baseline() {
        let rows = RowSet::new(
            vec!["ticker".into(), "year".into(), "value".into()],
            vec![
                vec![json!("ACME"), json!(2021), json!(1e-310)],
                vec![json!("ACME"), json!(2022), json!(1e300)],
            ],
        );
        let msg = SummaryAnalyzer.analyze(&rows, &ctx());
        let r = report(&msg);
        assert!(r.insights.iter().all(|i| i.value.is_finite()));
        assert!(serde_json::from_str::<AgentMessage>(&serde_json::to_string(&msg).unwrap()).is_ok());
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        let b = SummaryAnalyzer.analyze(&revenue_rows(), &ctx());
        assert_eq!(a, b);
    }
}
