//! 持久化存储端口
//!
//! 治理层只依赖这些读写操作；具体文档库、索引与原子性由外部实现负责。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::services::{AssessmentQuestion, BurnoutBand};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 存储暂时不可用（网络抖动、限流等），可重试
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 请求被存储拒绝（状态不符、题目不匹配等）
    #[error("Rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMetrics {
    pub total_users: u64,
    pub active_subscriptions: u64,
    pub alerts_last24h: u64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session_id: String,
    pub question: Option<AssessmentQuestion>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub user_id: String,
    pub session_id: String,
    pub question_id: String,
    pub value: f64,
}

/// 记录答案后的结果；完成时 nextQuestion 为 null
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band: Option<BurnoutBand>,
    pub next_question: Option<AssessmentQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub user_id: String,
    pub category: String,
    pub content: String,
    pub importance: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Sms,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub channel: AlertChannel,
    pub message: String,
    /// 邮件告警的收件地址
    pub recipient: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDelivery {
    pub delivered_via: AlertChannel,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDeliveryLog {
    pub user_id: Option<String>,
    pub to: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub plan: String,
    pub entitlements: Vec<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_admin_metrics(&self) -> Result<AdminMetrics, StoreError>;

    async fn start_assessment_session(
        &self,
        user_id: &str,
        definition_id: &str,
    ) -> Result<SessionStart, StoreError>;

    async fn record_assessment_answer(&self, answer: AnswerRecord) -> Result<AnswerOutcome, StoreError>;

    async fn save_memory_entry(&self, entry: MemoryEntry) -> Result<(), StoreError>;

    async fn fetch_pending_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError>;

    async fn mark_alert_processed(&self, alert_id: &str, delivery: AlertDelivery) -> Result<(), StoreError>;

    async fn log_email_delivery(&self, log: EmailDeliveryLog) -> Result<(), StoreError>;

    async fn refresh_entitlements(&self, user_id: &str) -> Result<Entitlements, StoreError>;
}
