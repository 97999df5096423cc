use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxpulse_common::channel::{ChannelConfig, ChannelDefinition};
use oxpulse_common::types::{AttemptStatus, NotificationAttempt};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};

use super::{conflict_or, from_db_time, to_db_time, Store};
use crate::entities::{notification_attempt, notification_channel};
use crate::error::{Result, StorageError};
use crate::{AttemptFilter, AttemptStore, ChannelStore};

/// Decodes the stored config blob into the typed [`ChannelConfig`].
fn to_channel(m: notification_channel::Model) -> Result<ChannelDefinition> {
    let raw: serde_json::Value = serde_json::from_str(&m.config_json)?;
    let config = ChannelConfig::parse(&m.channel_type, &raw)
        .map_err(|e| StorageError::decode("notification_channel", "config_json", e))?;
    Ok(ChannelDefinition {
        id: m.id,
        name: m.name,
        description: m.description,
        enabled: m.enabled,
        config,
        created_at: from_db_time(m.created_at),
        updated_at: from_db_time(m.updated_at),
    })
}

fn to_attempt(m: notification_attempt::Model) -> Result<NotificationAttempt> {
    Ok(NotificationAttempt {
        status: m
            .status
            .parse()
            .map_err(|e| StorageError::decode("notification_attempt", "status", e))?,
        id: m.id,
        alert_id: m.alert_id,
        channel: m.channel,
        channel_type: m.channel_type,
        error: m.error,
        sent_at: m.sent_at.map(from_db_time),
        created_at: from_db_time(m.created_at),
    })
}

#[async_trait]
impl ChannelStore for Store {
    async fn insert_channel(&self, ch: &ChannelDefinition) -> Result<ChannelDefinition> {
        use notification_channel::ActiveModel;
        let am = ActiveModel {
            id: Set(ch.id.clone()),
            name: Set(ch.name.clone()),
            channel_type: Set(ch.channel_type().to_string()),
            description: Set(ch.description.clone()),
            enabled: Set(ch.enabled),
            config_json: Set(ch.config.to_json().to_string()),
            created_at: Set(to_db_time(ch.created_at)),
            updated_at: Set(to_db_time(ch.updated_at)),
        };
        let model = am
            .insert(self.db())
            .await
            .map_err(|e| conflict_or(e, "notification_channel", &ch.name))?;
        to_channel(model)
    }

    async fn get_channel(&self, id: &str) -> Result<Option<ChannelDefinition>> {
        notification_channel::Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_channel)
            .transpose()
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelDefinition>> {
        notification_channel::Entity::find()
            .filter(notification_channel::Column::Name.eq(name))
            .one(self.db())
            .await?
            .map(to_channel)
            .transpose()
    }

    async fn update_channel(&self, ch: &ChannelDefinition) -> Result<Option<ChannelDefinition>> {
        let Some(model) = notification_channel::Entity::find_by_id(ch.id.as_str())
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let mut am: notification_channel::ActiveModel = model.into();
        am.name = Set(ch.name.clone());
        am.channel_type = Set(ch.channel_type().to_string());
        am.description = Set(ch.description.clone());
        am.enabled = Set(ch.enabled);
        am.config_json = Set(ch.config.to_json().to_string());
        am.updated_at = Set(to_db_time(ch.updated_at));
        let updated = am
            .update(self.db())
            .await
            .map_err(|e| conflict_or(e, "notification_channel", &ch.name))?;
        to_channel(updated).map(Some)
    }

    async fn delete_channel(&self, id: &str) -> Result<bool> {
        let res = notification_channel::Entity::delete_by_id(id)
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn list_channels(&self, limit: usize, offset: usize) -> Result<Vec<ChannelDefinition>> {
        let rows = notification_channel::Entity::find()
            .order_by(notification_channel::Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_channel).collect()
    }

    async fn count_channels(&self) -> Result<u64> {
        Ok(notification_channel::Entity::find().count(self.db()).await?)
    }
}

fn apply_attempt_filter(
    mut q: Select<notification_attempt::Entity>,
    filter: &AttemptFilter,
) -> Select<notification_attempt::Entity> {
    use notification_attempt::Column;
    if let Some(ref a) = filter.alert_id {
        q = q.filter(Column::AlertId.eq(a.as_str()));
    }
    if let Some(ref c) = filter.channel {
        q = q.filter(Column::Channel.eq(c.as_str()));
    }
    if let Some(s) = filter.status {
        q = q.filter(Column::Status.eq(s.as_str()));
    }
    q
}

#[async_trait]
impl AttemptStore for Store {
    async fn insert_attempt(&self, a: &NotificationAttempt) -> Result<()> {
        let am = notification_attempt::ActiveModel {
            id: Set(a.id.clone()),
            alert_id: Set(a.alert_id.clone()),
            channel: Set(a.channel.clone()),
            channel_type: Set(a.channel_type.clone()),
            status: Set(a.status.as_str().to_string()),
            error: Set(a.error.clone()),
            sent_at: Set(a.sent_at.map(to_db_time)),
            created_at: Set(to_db_time(a.created_at)),
        };
        notification_attempt::Entity::insert(am)
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn finish_attempt(
        &self,
        id: &str,
        status: AttemptStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        use notification_attempt::Column;
        let res = notification_attempt::Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::Error, Expr::value(error.map(str::to_string)))
            .col_expr(Column::SentAt, Expr::value(sent_at.map(to_db_time)))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(AttemptStatus::Pending.as_str()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn list_attempts(
        &self,
        filter: &AttemptFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationAttempt>> {
        let rows = apply_attempt_filter(notification_attempt::Entity::find(), filter)
            .order_by(notification_attempt::Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_attempt).collect()
    }

    async fn count_attempts(&self, filter: &AttemptFilter) -> Result<u64> {
        Ok(apply_attempt_filter(notification_attempt::Entity::find(), filter)
            .count(self.db())
            .await?)
    }
}
