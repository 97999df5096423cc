//! Statistical and language-model enrichment of alerts.
//!
//! - [`anomaly::AnomalyDetector`] scores the current value against up to 30
//!   days of history (Z-score, severity-adjusted threshold).
//! - [`trend::TrendPredictor`] fits a least-squares line over up to 7 days
//!   of history, projects it forward and flags daily seasonality.
//! - [`narrative::NarrativeAnalyzer`] turns both signals plus rule context
//!   into a root-cause narrative through an OpenAI-compatible chat API.
//!
//! History comes from any [`history::MetricHistory`]; Prometheus is the
//! production source.

pub mod anomaly;
pub mod history;
pub mod knowledge;
pub mod models;
pub mod narrative;
pub mod prompt;
pub mod providers;
pub mod trend;

#[cfg(test)]
mod tests;

pub use anomaly::{AnomalyDetector, AnomalyResult, DeviationLevel};
pub use history::{HistoryPoint, MetricHistory, PrometheusHistory, StaticHistory};
pub use knowledge::KnowledgeBase;
pub use narrative::{AnalyzerError, NarrativeAnalyzer, RuleContext};
pub use providers::openai::OpenAiCompatProvider;
pub use providers::ChatProvider;
pub use trend::{RiskLevel, TrendDirection, TrendPredictor, TrendResult};
