//! Bulk import of rules and channels from JSON seed files.
//!
//! Entries whose name already exists are skipped, so a seed file can be
//! applied repeatedly.

use anyhow::Context;
use chrono::Utc;
use oxpulse_alert::RuleRepository;
use oxpulse_common::channel::ChannelDefinition;
use oxpulse_common::types::{AlertRule, CompareOp, Labels, Severity, TargetSelector};
use oxpulse_notify::plugin::ChannelRegistry;
use oxpulse_storage::{ChannelStore, RuleFilter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

const EXISTING_SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRule {
    pub name: String,
    #[serde(default)]
    pub target: TargetSelector,
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default = "default_seed_severity")]
    pub severity: Severity,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_seed_owner")]
    pub owner: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsSeedFile {
    #[serde(default)]
    pub channels: Vec<SeedChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedChannel {
    pub name: String,
    pub channel_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    pub config: serde_json::Value,
}

fn default_seed_severity() -> Severity {
    Severity::Medium
}

fn default_seed_enabled() -> bool {
    true
}

fn default_seed_owner() -> String {
    "seed".to_string()
}

/// Outcome of one import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn load_seed<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file '{}'", path.display()))
}

pub async fn seed_rules(rules: &RuleRepository, seed: &RulesSeedFile) -> anyhow::Result<SeedReport> {
    let existing: HashSet<String> = rules
        .list_rules(&RuleFilter::default(), EXISTING_SCAN_LIMIT, 0)
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let mut report = SeedReport::default();
    for entry in &seed.rules {
        if existing.contains(&entry.name) {
            tracing::warn!(name = %entry.name, "Rule already exists, skipping");
            report.skipped += 1;
            continue;
        }
        let now = Utc::now();
        let rule = AlertRule {
            id: String::new(),
            name: entry.name.clone(),
            target: entry.target.clone(),
            metric: entry.metric.clone(),
            operator: entry.operator,
            threshold: entry.threshold,
            duration_secs: entry.duration_secs,
            severity: entry.severity,
            enabled: entry.enabled,
            labels: entry.labels.clone(),
            channels: entry.channels.clone(),
            owner: entry.owner.clone(),
            created_at: now,
            updated_at: now,
        };
        match rules.create_rule(rule).await {
            Ok(saved) => {
                tracing::info!(name = %saved.name, id = %saved.id, "Rule created");
                report.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %entry.name, error = %e, "Failed to create rule");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

pub async fn seed_channels(
    channels: &dyn ChannelStore,
    registry: &ChannelRegistry,
    seed: &ChannelsSeedFile,
) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();
    for entry in &seed.channels {
        if channels.get_channel_by_name(&entry.name).await?.is_some() {
            tracing::warn!(name = %entry.name, "Channel already exists, skipping");
            report.skipped += 1;
            continue;
        }
        let config = match registry.validate(&entry.channel_type, &entry.config) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(name = %entry.name, error = %e, "Invalid channel in seed file");
                report.failed += 1;
                continue;
            }
        };
        let now = Utc::now();
        let def = ChannelDefinition {
            id: oxpulse_common::id::next_id(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            enabled: entry.enabled,
            config,
            created_at: now,
            updated_at: now,
        };
        match channels.insert_channel(&def).await {
            Ok(saved) => {
                tracing::info!(name = %saved.name, id = %saved.id, "Channel created");
                report.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %entry.name, error = %e, "Failed to create channel");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxpulse_storage::MemoryStore;
    use std::sync::Arc;

    fn rules_seed() -> RulesSeedFile {
        serde_json::from_value(serde_json::json!({
            "rules": [
                {"name": "cpu high", "metric": "cpu", "operator": ">", "threshold": 90.0, "severity": "critical"},
                {"name": "disk full", "metric": "disk", "operator": "gte", "threshold": 95.0},
                {"name": "", "metric": "mem", "operator": ">", "threshold": 1.0}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn rules_are_imported_once() {
        let store = Arc::new(MemoryStore::new());
        let repo = RuleRepository::new(store, std::time::Duration::from_secs(60));

        let first = seed_rules(&repo, &rules_seed()).await.unwrap();
        assert_eq!(first, SeedReport { created: 2, skipped: 0, failed: 1 });

        let second = seed_rules(&repo, &rules_seed()).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 2);

        let disk = repo.rules_for_metric("disk").await.unwrap();
        assert_eq!(disk[0].severity, Severity::Medium);
        assert_eq!(disk[0].operator, CompareOp::GreaterEqual);
    }

    #[tokio::test]
    async fn channels_are_validated_and_deduplicated() {
        let store = MemoryStore::new();
        let registry = ChannelRegistry::default();
        let seed: ChannelsSeedFile = serde_json::from_value(serde_json::json!({
            "channels": [
                {"name": "ops", "channel_type": "webhook", "config": {"url": "https://hooks.example.com/ops", "method": "POST"}},
                {"name": "broken", "channel_type": "webhook", "config": {"url": "not a url", "method": "POST"}},
                {"name": "pager", "channel_type": "pagerduty", "config": {}}
            ]
        }))
        .unwrap();

        let report = seed_channels(&store, &registry, &seed).await.unwrap();
        assert_eq!(report, SeedReport { created: 1, skipped: 0, failed: 2 });
        let again = seed_channels(&store, &registry, &seed).await.unwrap();
        assert_eq!(again.skipped, 1);
    }
}
