use async_trait::async_trait;
use chrono::Utc;
use oxpulse_common::types::{AlertRule, TargetSelector};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};

use super::{conflict_or, from_db_time, to_db_time, Store};
use crate::entities::alert_rule::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::{RuleFilter, RuleStore};

const ENTITY: &str = "alert_rule";

pub(crate) fn to_rule(m: alert_rule::Model) -> Result<AlertRule> {
    Ok(AlertRule {
        operator: m
            .operator
            .parse()
            .map_err(|e| StorageError::decode(ENTITY, "operator", e))?,
        severity: m
            .severity
            .parse()
            .map_err(|e| StorageError::decode(ENTITY, "severity", e))?,
        labels: serde_json::from_str(&m.labels_json)?,
        channels: serde_json::from_str(&m.channels_json)?,
        id: m.id,
        name: m.name,
        target: TargetSelector {
            target_type: m.target_type,
            target_id: m.target_id,
        },
        metric: m.metric,
        threshold: m.threshold,
        duration_secs: u64::try_from(m.duration_secs).unwrap_or(0),
        enabled: m.enabled,
        owner: m.owner,
        created_at: from_db_time(m.created_at),
        updated_at: from_db_time(m.updated_at),
    })
}

fn duration_column(rule: &AlertRule) -> i64 {
    i64::try_from(rule.duration_secs).unwrap_or(i64::MAX)
}

fn live() -> Select<Entity> {
    Entity::find().filter(Column::DeletedAt.is_null())
}

fn apply_filter(mut q: Select<Entity>, filter: &RuleFilter) -> Select<Entity> {
    if let Some(ref s) = filter.name_contains {
        q = q.filter(Column::Name.contains(s.as_str()));
    }
    if let Some(ref m) = filter.metric_eq {
        q = q.filter(Column::Metric.eq(m.as_str()));
    }
    if let Some(s) = filter.severity_eq {
        q = q.filter(Column::Severity.eq(s.as_str()));
    }
    if let Some(e) = filter.enabled_eq {
        q = q.filter(Column::Enabled.eq(e));
    }
    q
}

#[async_trait]
impl RuleStore for Store {
    async fn insert_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let am = alert_rule::ActiveModel {
            id: Set(rule.id.clone()),
            name: Set(rule.name.clone()),
            target_type: Set(rule.target.target_type.clone()),
            target_id: Set(rule.target.target_id.clone()),
            metric: Set(rule.metric.clone()),
            operator: Set(rule.operator.symbol().to_string()),
            threshold: Set(rule.threshold),
            duration_secs: Set(duration_column(rule)),
            severity: Set(rule.severity.to_string()),
            enabled: Set(rule.enabled),
            labels_json: Set(serde_json::to_string(&rule.labels)?),
            channels_json: Set(serde_json::to_string(&rule.channels)?),
            owner: Set(rule.owner.clone()),
            deleted_at: Set(None),
            created_at: Set(to_db_time(rule.created_at)),
            updated_at: Set(to_db_time(rule.updated_at)),
        };
        let model = am
            .insert(self.db())
            .await
            .map_err(|e| conflict_or(e, ENTITY, &rule.name))?;
        to_rule(model)
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        live()
            .filter(Column::Id.eq(id))
            .one(self.db())
            .await?
            .map(to_rule)
            .transpose()
    }

    async fn update_rule(&self, rule: &AlertRule) -> Result<Option<AlertRule>> {
        let Some(model) = live().filter(Column::Id.eq(rule.id.as_str())).one(self.db()).await?
        else {
            return Ok(None);
        };
        let mut am: alert_rule::ActiveModel = model.into();
        am.name = Set(rule.name.clone());
        am.target_type = Set(rule.target.target_type.clone());
        am.target_id = Set(rule.target.target_id.clone());
        am.metric = Set(rule.metric.clone());
        am.operator = Set(rule.operator.symbol().to_string());
        am.threshold = Set(rule.threshold);
        am.duration_secs = Set(duration_column(rule));
        am.severity = Set(rule.severity.to_string());
        am.enabled = Set(rule.enabled);
        am.labels_json = Set(serde_json::to_string(&rule.labels)?);
        am.channels_json = Set(serde_json::to_string(&rule.channels)?);
        am.owner = Set(rule.owner.clone());
        am.updated_at = Set(to_db_time(rule.updated_at));
        let updated = am
            .update(self.db())
            .await
            .map_err(|e| conflict_or(e, ENTITY, &rule.name))?;
        to_rule(updated).map(Some)
    }

    async fn delete_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let Some(model) = live().filter(Column::Id.eq(id)).one(self.db()).await? else {
            return Ok(None);
        };
        let rule = to_rule(model.clone())?;
        let now = to_db_time(Utc::now());
        let mut am: alert_rule::ActiveModel = model.into();
        am.deleted_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(Some(rule))
    }

    async fn list_rules(
        &self,
        filter: &RuleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRule>> {
        let rows = apply_filter(live(), filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_rule).collect()
    }

    async fn count_rules(&self, filter: &RuleFilter) -> Result<u64> {
        Ok(apply_filter(live(), filter).count(self.db()).await?)
    }

    async fn list_enabled_rules_for_metric(&self, metric: &str) -> Result<Vec<AlertRule>> {
        let rows = live()
            .filter(Column::Metric.eq(metric))
            .filter(Column::Enabled.eq(true))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_rule).collect()
    }
}
