pub mod alert;
pub mod alert_rule;
pub mod analysis_result;
pub mod notification_attempt;
pub mod notification_channel;
