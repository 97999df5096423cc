use async_trait::async_trait;
use oxpulse_common::types::AnalysisResult;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};

use super::{from_db_time, to_db_time, Store};
use crate::entities::analysis_result::{self, Column, Entity};
use crate::error::Result;
use crate::{AnalysisFilter, AnalysisStore};

fn to_result(m: analysis_result::Model) -> Result<AnalysisResult> {
    Ok(AnalysisResult {
        input: serde_json::from_str(&m.input_json)?,
        recommendations: serde_json::from_str(&m.recommendations_json)?,
        id: m.id,
        analysis_type: m.analysis_type,
        alert_id: m.alert_id,
        target_type: m.target_type,
        target_id: m.target_id,
        narrative: m.narrative,
        root_cause: m.root_cause,
        severity_assessment: m.severity_assessment,
        confidence: m.confidence,
        created_at: from_db_time(m.created_at),
    })
}

fn apply_filter(mut q: Select<Entity>, filter: &AnalysisFilter) -> Select<Entity> {
    if let Some(ref a) = filter.alert_id {
        q = q.filter(Column::AlertId.eq(a.as_str()));
    }
    if let Some(ref t) = filter.target_id {
        q = q.filter(Column::TargetId.eq(t.as_str()));
    }
    if let Some(ref m) = filter.metric_name {
        q = q.filter(Column::MetricName.eq(m.as_str()));
    }
    if let Some(ref t) = filter.analysis_type {
        q = q.filter(Column::AnalysisType.eq(t.as_str()));
    }
    q
}

#[async_trait]
impl AnalysisStore for Store {
    async fn insert_analysis(&self, r: &AnalysisResult) -> Result<()> {
        let am = analysis_result::ActiveModel {
            id: Set(r.id.clone()),
            analysis_type: Set(r.analysis_type.clone()),
            alert_id: Set(r.alert_id.clone()),
            target_type: Set(r.target_type.clone()),
            target_id: Set(r.target_id.clone()),
            metric_name: Set(r.input.metric_name.clone()),
            input_json: Set(serde_json::to_string(&r.input)?),
            narrative: Set(r.narrative.clone()),
            root_cause: Set(r.root_cause.clone()),
            recommendations_json: Set(serde_json::to_string(&r.recommendations)?),
            severity_assessment: Set(r.severity_assessment.clone()),
            confidence: Set(r.confidence.clamp(0.0, 1.0)),
            created_at: Set(to_db_time(r.created_at)),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(())
    }

    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AnalysisResult>> {
        let rows = apply_filter(Entity::find(), filter)
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_result).collect()
    }

    async fn count_analyses(&self, filter: &AnalysisFilter) -> Result<u64> {
        Ok(apply_filter(Entity::find(), filter).count(self.db()).await?)
    }
}
