use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, SqlErr};

use crate::error::StorageError;

mod alert;
mod analysis;
mod notification;
mod rule;

/// 基于 SeaORM 的存储实现，覆盖全部仓储 trait。
///
/// 所有方法均为 `async fn`；连接时由 `sea-orm-migration` 自动迁移表结构。
#[derive(Clone)]
pub struct Store {
    pub(crate) db: DatabaseConnection,
}

impl Store {
    /// 连接并初始化数据库。
    ///
    /// `db_url` 为完整连接串，例如
    /// `sqlite:///var/lib/oxpulse/oxpulse.db?mode=rwc`.
    pub async fn new(db_url: &str) -> Result<Self> {
        let db = Database::connect(db_url).await?;

        if db_url.starts_with("sqlite:") && !db_url.contains(":memory:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;
        tracing::info!(db_url = %db_url, "Initialized store (SeaORM)");

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

pub(crate) fn to_db_time(t: DateTime<Utc>) -> DateTime<FixedOffset> {
    t.fixed_offset()
}

pub(crate) fn from_db_time(t: DateTime<FixedOffset>) -> DateTime<Utc> {
    t.with_timezone(&Utc)
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// 唯一约束冲突映射为 [`StorageError::Conflict`]，其余保留为数据库错误。
pub(crate) fn conflict_or(err: DbErr, entity: &'static str, key: &str) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict {
            entity,
            key: key.to_string(),
        }
    } else {
        StorageError::Database(err)
    }
}
