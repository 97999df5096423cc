use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    target_type TEXT NOT NULL DEFAULT '',
    target_id TEXT,
    metric TEXT NOT NULL,
    operator TEXT NOT NULL,
    threshold REAL NOT NULL,
    duration_secs INTEGER NOT NULL DEFAULT 0,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    labels_json TEXT NOT NULL DEFAULT '{}',
    channels_json TEXT NOT NULL DEFAULT '[]',
    owner TEXT NOT NULL DEFAULT '',
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_alert_rules_name_live ON alert_rules(name) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_alert_rules_metric_enabled ON alert_rules(metric, enabled);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    rule_name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL,
    value REAL NOT NULL,
    threshold REAL NOT NULL,
    message TEXT NOT NULL,
    labels_json TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    acknowledged_at TEXT,
    acknowledged_by TEXT,
    resolved_at TEXT,
    resolved_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_open_fingerprint ON alerts(fingerprint) WHERE status <> 'resolved';
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
CREATE INDEX IF NOT EXISTS idx_alerts_started_at ON alerts(started_at DESC);

CREATE TABLE IF NOT EXISTS notification_channels (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    channel_type TEXT NOT NULL,
    description TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    config_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    alert_id TEXT,
    channel TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    sent_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notification_attempts_alert ON notification_attempts(alert_id);
CREATE INDEX IF NOT EXISTS idx_notification_attempts_created ON notification_attempts(created_at DESC);

CREATE TABLE IF NOT EXISTS analysis_results (
    id TEXT PRIMARY KEY NOT NULL,
    analysis_type TEXT NOT NULL,
    alert_id TEXT,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    input_json TEXT NOT NULL,
    narrative TEXT NOT NULL,
    root_cause TEXT NOT NULL,
    recommendations_json TEXT NOT NULL DEFAULT '[]',
    severity_assessment TEXT NOT NULL,
    confidence REAL NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_results_series ON analysis_results(target_id, metric_name, created_at DESC);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS analysis_results;
DROP TABLE IF EXISTS notification_attempts;
DROP TABLE IF EXISTS notification_channels;
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS alert_rules;
";
