//! Alert rule evaluation and alert lifecycle.
//!
//! [`evaluator::AlertEvaluator`] consumes metric samples, looks up matching
//! rules through the cached [`repository::RuleRepository`], and drives each
//! `(rule, target)` alert through `firing -> acknowledged -> resolved`.
//! Notifications and analyses are handed to a bounded
//! [`queue::TaskQueue`] so that ingestion never waits on delivery.

pub mod analysis;
pub mod evaluator;
pub mod queue;
pub mod repository;
pub mod state;


pub use analysis::AnalysisPipeline;
pub use evaluator::{AlertEvaluator, EvalError, EvalOutcome, EvaluatorConfig};
pub use queue::{QueueError, QueueStats, TaskQueue};
pub use repository::{RuleError, RuleRepository};
pub use state::{AlertActionError, InvalidStateError};
