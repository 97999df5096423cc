use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "analysis_results")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub analysis_type: String,
    pub alert_id: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub metric_name: String,
    pub input_json: String,
    pub narrative: String,
    pub root_cause: String,
    pub recommendations_json: String,
    pub severity_assessment: String,
    pub confidence: f64,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
