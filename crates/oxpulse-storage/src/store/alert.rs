use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxpulse_common::types::{Alert, AlertStatus, Labels};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, UpdateMany,
};

use super::{from_db_time, is_unique_violation, to_db_time, Store};
use crate::entities::alert::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::{AlertFilter, AlertStats, AlertStore, InsertOutcome, Transition};

const ENTITY: &str = "alert";
const LABEL_MERGE_ATTEMPTS: usize = 8;

fn to_alert(m: alert::Model) -> Result<Alert> {
    Ok(Alert {
        severity: m
            .severity
            .parse()
            .map_err(|e| StorageError::decode(ENTITY, "severity", e))?,
        status: m
            .status
            .parse()
            .map_err(|e| StorageError::decode(ENTITY, "status", e))?,
        labels: serde_json::from_str(&m.labels_json)?,
        id: m.id,
        rule_id: m.rule_id,
        rule_name: m.rule_name,
        fingerprint: m.fingerprint,
        target_type: m.target_type,
        target_id: m.target_id,
        metric_name: m.metric_name,
        value: m.value,
        threshold: m.threshold,
        message: m.message,
        started_at: from_db_time(m.started_at),
        last_seen_at: from_db_time(m.last_seen_at),
        acknowledged_at: m.acknowledged_at.map(from_db_time),
        acknowledged_by: m.acknowledged_by,
        resolved_at: m.resolved_at.map(from_db_time),
        resolved_by: m.resolved_by,
        created_at: from_db_time(m.created_at),
        updated_at: from_db_time(m.updated_at),
    })
}

fn apply_filter(mut q: Select<Entity>, filter: &AlertFilter) -> Select<Entity> {
    if let Some(s) = filter.status {
        q = q.filter(Column::Status.eq(s.as_str()));
    }
    if let Some(s) = filter.severity {
        q = q.filter(Column::Severity.eq(s.as_str()));
    }
    if let Some(ref r) = filter.rule_id {
        q = q.filter(Column::RuleId.eq(r.as_str()));
    }
    if let Some(ref t) = filter.target_id {
        q = q.filter(Column::TargetId.eq(t.as_str()));
    }
    if let Some(since) = filter.since {
        q = q.filter(Column::StartedAt.gte(to_db_time(since)));
    }
    q
}

impl Store {
    /// Merges `labels` into the stored set. The write only lands if the
    /// labels are still what was read, so concurrent merges never drop each
    /// other's keys. Returns `false` when the alert is missing, or resolved
    /// while `open_only` is set.
    async fn merge_alert_labels<F>(
        &self,
        id: &str,
        labels: &Labels,
        open_only: bool,
        extra: F,
    ) -> Result<bool>
    where
        F: Fn(UpdateMany<Entity>) -> UpdateMany<Entity>,
    {
        for _ in 0..LABEL_MERGE_ATTEMPTS {
            let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
                return Ok(false);
            };
            if open_only && model.status == AlertStatus::Resolved.as_str() {
                return Ok(false);
            }
            let mut merged: Labels = serde_json::from_str(&model.labels_json)?;
            merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));

            let mut update = extra(Entity::update_many())
                .col_expr(Column::LabelsJson, Expr::value(serde_json::to_string(&merged)?))
                .col_expr(Column::UpdatedAt, Expr::value(to_db_time(Utc::now())))
                .filter(Column::Id.eq(id))
                .filter(Column::LabelsJson.eq(model.labels_json));
            if open_only {
                update = update.filter(Column::Status.ne(AlertStatus::Resolved.as_str()));
            }
            if update.exec(self.db()).await?.rows_affected > 0 {
                return Ok(true);
            }
        }
        Err(StorageError::Conflict {
            entity: ENTITY,
            key: id.to_string(),
        })
    }
}

#[async_trait]
impl AlertStore for Store {
    async fn find_open_alert(&self, fingerprint: &str) -> Result<Option<Alert>> {
        Entity::find()
            .filter(Column::Fingerprint.eq(fingerprint))
            .filter(Column::Status.ne(AlertStatus::Resolved.as_str()))
            .one(self.db())
            .await?
            .map(to_alert)
            .transpose()
    }

    async fn insert_open_alert(&self, a: &Alert) -> Result<InsertOutcome> {
        let am = alert::ActiveModel {
            id: Set(a.id.clone()),
            rule_id: Set(a.rule_id.clone()),
            rule_name: Set(a.rule_name.clone()),
            fingerprint: Set(a.fingerprint.clone()),
            target_type: Set(a.target_type.clone()),
            target_id: Set(a.target_id.clone()),
            metric_name: Set(a.metric_name.clone()),
            severity: Set(a.severity.to_string()),
            status: Set(a.status.to_string()),
            value: Set(a.value),
            threshold: Set(a.threshold),
            message: Set(a.message.clone()),
            labels_json: Set(serde_json::to_string(&a.labels)?),
            started_at: Set(to_db_time(a.started_at)),
            last_seen_at: Set(to_db_time(a.last_seen_at)),
            acknowledged_at: Set(a.acknowledged_at.map(to_db_time)),
            acknowledged_by: Set(a.acknowledged_by.clone()),
            resolved_at: Set(a.resolved_at.map(to_db_time)),
            resolved_by: Set(a.resolved_by.clone()),
            created_at: Set(to_db_time(a.created_at)),
            updated_at: Set(to_db_time(a.updated_at)),
        };
        match am.insert(self.db()).await {
            Ok(model) => Ok(InsertOutcome::Created(to_alert(model)?)),
            Err(e) if is_unique_violation(&e) => match self.find_open_alert(&a.fingerprint).await? {
                Some(existing) => Ok(InsertOutcome::Existing(existing)),
                // The competing alert was resolved between our insert and the read-back.
                None => Err(StorageError::Conflict {
                    entity: ENTITY,
                    key: a.fingerprint.clone(),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_open_alert(
        &self,
        id: &str,
        value: f64,
        labels: &Labels,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let seen_at = to_db_time(seen_at);
        self.merge_alert_labels(id, labels, true, |update| {
            update
                .col_expr(Column::Value, Expr::value(value))
                .col_expr(Column::LastSeenAt, Expr::value(seen_at))
        })
        .await
    }

    async fn transition_alert(&self, id: &str, t: &Transition) -> Result<Option<Alert>> {
        let from: Vec<&'static str> = t.allowed_from().iter().map(|s| s.as_str()).collect();
        if from.is_empty() {
            return Ok(None);
        }
        let at = to_db_time(t.at);
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(t.to.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(at));
        match t.to {
            AlertStatus::Acknowledged => {
                update = update
                    .col_expr(Column::AcknowledgedAt, Expr::value(Some(at)))
                    .col_expr(Column::AcknowledgedBy, Expr::value(t.actor.clone()));
            }
            AlertStatus::Resolved => {
                update = update
                    .col_expr(Column::ResolvedAt, Expr::value(Some(at)))
                    .col_expr(Column::ResolvedBy, Expr::value(t.actor.clone()));
            }
            AlertStatus::Firing => {}
        }
        let res = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(from))
            .exec(self.db())
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }
        self.get_alert(id).await
    }

    async fn annotate_alert(&self, id: &str, labels: &Labels) -> Result<Option<Alert>> {
        if !self.merge_alert_labels(id, labels, false, |update| update).await? {
            return Ok(None);
        }
        self.get_alert(id).await
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_alert)
            .transpose()
    }

    async fn list_alerts(
        &self,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>> {
        let rows = apply_filter(Entity::find(), filter)
            .order_by(Column::StartedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_alert).collect()
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<u64> {
        Ok(apply_filter(Entity::find(), filter).count(self.db()).await?)
    }

    async fn alert_stats(&self, since: DateTime<Utc>) -> Result<AlertStats> {
        let rows = Entity::find()
            .filter(Column::StartedAt.gte(to_db_time(since)))
            .all(self.db())
            .await?;
        let mut stats = AlertStats::default();
        for row in rows {
            stats.record(&to_alert(row)?);
        }
        Ok(stats)
    }
}
