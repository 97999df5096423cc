//! Operational runbook snippets quoted into narrative prompts.

use anyhow::{Context, Result};
use oxpulse_common::types::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub title: String,
    /// Matched as lowercase substrings of the metric name.
    pub metric_keywords: Vec<String>,
    #[serde(default)]
    pub severities: Vec<Severity>,
    pub content: String,
}

impl KnowledgeEntry {
    fn new(title: &str, keywords: &[&str], severities: &[Severity], content: &str) -> Self {
        Self {
            title: title.to_string(),
            metric_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            severities: severities.to_vec(),
            content: content.to_string(),
        }
    }

    fn score(&self, metric: &str, severity: Severity) -> u32 {
        let metric = metric.to_lowercase();
        let mut score = 0;
        if self
            .metric_keywords
            .iter()
            .any(|k| !k.is_empty() && metric.contains(&k.to_lowercase()))
        {
            score += 2;
        }
        if self.severities.contains(&severity) {
            score += 1;
        }
        score
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        use Severity::*;
        let entries = vec![
            KnowledgeEntry::new(
                "CPU saturation",
                &["cpu", "load"],
                &[High, Critical],
                "Sustained high CPU usually comes from a runaway process, a traffic spike or \
                 insufficient capacity. Check the top consumers, recent deploys and request rate; \
                 scale out or throttle if load is legitimate.",
            ),
            KnowledgeEntry::new(
                "Memory pressure",
                &["memory", "mem", "swap", "oom"],
                &[High, Critical],
                "Steadily rising memory points to a leak, unbounded caches or growing working sets. \
                 Compare RSS per process over time, look for OOM-killer events and restart or cap \
                 the offending service.",
            ),
            KnowledgeEntry::new(
                "Disk usage",
                &["disk", "filesystem", "inode", "volume"],
                &[Medium, High, Critical],
                "Fast disk growth is typically logs, temp files or database bloat. Find the largest \
                 directories, verify log rotation and retention, and extend the volume before it \
                 fills.",
            ),
            KnowledgeEntry::new(
                "Network errors and throughput",
                &["network", "net", "packet", "bandwidth", "tcp"],
                &[Medium, High],
                "Drops and retransmits suggest saturated links, misconfigured MTU or failing \
                 hardware. Check interface counters, upstream dependencies and recent network \
                 changes.",
            ),
            KnowledgeEntry::new(
                "Latency regression",
                &["latency", "duration", "response_time", "p99", "p95"],
                &[Medium, High, Critical],
                "Latency spikes often follow slow dependencies, lock contention or garbage \
                 collection pauses. Correlate with downstream latency, saturation metrics and the \
                 latest deploy.",
            ),
            KnowledgeEntry::new(
                "Error rate increase",
                &["error", "5xx", "failure", "exception"],
                &[High, Critical],
                "A rising error rate is most often caused by a bad release, an unavailable \
                 dependency or exhausted resources. Inspect recent error logs, roll back suspicious \
                 changes and check dependency health.",
            ),
        ];
        Self { entries }
    }

    /// Built-in entries extended with the JSON array in `path`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        let extra: Vec<KnowledgeEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse knowledge file {}", path.display()))?;
        let mut kb = Self::builtin();
        kb.entries.extend(extra);
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `limit` entries relevant to the metric or severity, best
    /// match first. A metric keyword hit outranks a severity hit.
    pub fn lookup(&self, metric: &str, severity: Severity, limit: usize) -> Vec<&KnowledgeEntry> {
        let mut scored: Vec<(u32, usize, &KnowledgeEntry)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.score(metric, severity), i, e))
            .filter(|(score, _, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().take(limit).map(|(_, _, e)| e).collect()
    }
}
