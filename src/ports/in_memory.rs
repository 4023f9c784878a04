//! 内存版存储与传输（测试与本地演示）
//!
//! 行为与线上存储保持一致：评估题目必须按顺序作答，完成后会话关闭。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::ports::store::{
    AdminMetrics, AlertDelivery, AlertRecord, AnswerOutcome, AnswerRecord, EmailDeliveryLog,
    Entitlements, MemoryEntry, SessionStart, Store, StoreError,
};
use crate::ports::transport::{
    EmailReceipt, EmailRequest, MessageReceipt, OutboundMessage, Transport, TransportError,
};
use crate::services::{AssessmentService, QuestionKind};

#[derive(Debug, Clone)]
struct AssessmentSession {
    user_id: String,
    definition_id: String,
    answers: Vec<f64>,
    question_index: usize,
    completed: bool,
}

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, AssessmentSession>,
    memories: Vec<MemoryEntry>,
    alerts: Vec<(AlertRecord, Option<AlertDelivery>)>,
    email_log: Vec<EmailDeliveryLog>,
    entitlements: HashMap<String, Entitlements>,
    metrics: AdminMetrics,
}

/// 内存存储
pub struct InMemoryStore {
    assessment: AssessmentService,
    state: RwLock<StoreState>,
    /// 接下来 N 次调用返回 Unavailable
    unavailable: AtomicU32,
}

impl InMemoryStore {
    pub fn new(assessment: AssessmentService) -> Self {
        Self {
            assessment,
            state: RwLock::new(StoreState::default()),
            unavailable: AtomicU32::new(0),
        }
    }

    /// 以指定 id 打开会话（测试夹具）
    pub async fn open_session(&self, session_id: &str, user_id: &str, definition_id: &str) {
        self.state.write().await.sessions.insert(
            session_id.to_string(),
            AssessmentSession {
                user_id: user_id.to_string(),
                definition_id: definition_id.to_string(),
                answers: Vec::new(),
                question_index: 0,
                completed: false,
            },
        );
    }

    pub async fn push_alert(&self, alert: AlertRecord) {
        self.state.write().await.alerts.push((alert, None));
    }

    pub async fn set_metrics(&self, metrics: AdminMetrics) {
        self.state.write().await.metrics = metrics;
    }

    pub async fn set_entitlements(&self, user_id: &str, entitlements: Entitlements) {
        self.state
            .write()
            .await
            .entitlements
            .insert(user_id.to_string(), entitlements);
    }

    pub fn fail_next(&self, calls: u32) {
        self.unavailable.store(calls, Ordering::SeqCst);
    }

    pub async fn memories(&self) -> Vec<MemoryEntry> {
        self.state.read().await.memories.clone()
    }

    pub async fn email_log(&self) -> Vec<EmailDeliveryLog> {
        self.state.read().await.email_log.clone()
    }

    pub async fn processed_alerts(&self) -> Vec<(String, AlertDelivery)> {
        self.state
            .read()
            .await
            .alerts
            .iter()
            .filter_map(|(alert, delivery)| delivery.clone().map(|d| (alert.id.clone(), d)))
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let tripped = self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_admin_metrics(&self) -> Result<AdminMetrics, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.metrics.clone())
    }

    async fn start_assessment_session(
        &self,
        user_id: &str,
        definition_id: &str,
    ) -> Result<SessionStart, StoreError> {
        self.check_available()?;
        let definition = self
            .assessment
            .definition(definition_id)
            .ok_or_else(|| StoreError::NotFound(format!("assessment definition {definition_id}")))?;

        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        self.open_session(&session_id, user_id, definition_id).await;
        Ok(SessionStart {
            session_id,
            question: definition.questions.first().cloned(),
        })
    }

    async fn record_assessment_answer(&self, answer: AnswerRecord) -> Result<AnswerOutcome, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&answer.session_id)
            .filter(|s| s.user_id == answer.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("assessment session {}", answer.session_id)))?;
        if session.completed {
            return Err(StoreError::Rejected("Assessment session not active".to_string()));
        }

        let definition = self
            .assessment
            .definition(&session.definition_id)
            .ok_or_else(|| StoreError::NotFound(format!("assessment definition {}", session.definition_id)))?;
        let expected = definition
            .questions
            .get(session.question_index)
            .ok_or_else(|| StoreError::Rejected("Assessment session has no pending question".to_string()))?;
        if expected.id != answer.question_id {
            return Err(StoreError::Rejected(format!(
                "Question mismatch: expected {}, got {}",
                expected.id, answer.question_id
            )));
        }
        if expected.kind == QuestionKind::Scale && !expected.accepts(answer.value) {
            let (min, max) = expected.range();
            return Err(StoreError::Rejected(format!(
                "Answer to {} out of range: {} not in [{min}, {max}]",
                expected.id, answer.value
            )));
        }

        // 先在副本上计分，成功后才写回会话
        let mut answers = session.answers.clone();
        answers.push(answer.value);
        let next = definition.next_after(&expected.id).cloned();
        let scored = match next {
            Some(_) => None,
            None => Some(
                self.assessment
                    .score(&session.definition_id, &answers)
                    .map_err(|e| StoreError::Rejected(e.to_string()))?,
            ),
        };

        session.answers = answers;
        session.question_index += 1;
        session.completed = scored.is_some();
        Ok(AnswerOutcome {
            completed: session.completed,
            score: scored.map(|s| s.score),
            band: scored.map(|s| s.band),
            next_question: next,
        })
    }

    async fn save_memory_entry(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().await.memories.push(entry);
        Ok(())
    }

    async fn fetch_pending_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .alerts
            .iter()
            .filter(|(_, delivery)| delivery.is_none())
            .take(limit)
            .map(|(alert, _)| alert.clone())
            .collect())
    }

    async fn mark_alert_processed(&self, alert_id: &str, delivery: AlertDelivery) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let slot = state
            .alerts
            .iter_mut()
            .find(|(alert, _)| alert.id == alert_id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
        slot.1 = Some(delivery);
        Ok(())
    }

    async fn log_email_delivery(&self, log: EmailDeliveryLog) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().await.email_log.push(log);
        Ok(())
    }

    async fn refresh_entitlements(&self, user_id: &str) -> Result<Entitlements, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .entitlements
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Entitlements {
                plan: "free".to_string(),
                entitlements: vec!["assessments".to_string()],
                valid_until: None,
            }))
    }
}

/// 记录所有发送请求的传输实现
#[derive(Default)]
pub struct RecordingTransport {
    emails: RwLock<Vec<EmailRequest>>,
    messages: RwLock<Vec<OutboundMessage>>,
    unavailable: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 N 次发送返回 Unavailable
    pub fn fail_next(&self, sends: u32) {
        self.unavailable.store(sends, Ordering::SeqCst);
    }

    pub async fn emails(&self) -> Vec<EmailRequest> {
        self.emails.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.read().await.clone()
    }

    fn check_available(&self) -> Result<(), TransportError> {
        let tripped = self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(TransportError::Unavailable("provider returned 503".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_email(&self, email: EmailRequest) -> Result<EmailReceipt, TransportError> {
        self.check_available()?;
        tracing::info!(to = %email.to, subject = %email.subject, "email queued");
        self.emails.write().await.push(email);
        Ok(EmailReceipt {
            id: format!("email-{}", uuid::Uuid::new_v4()),
        })
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageReceipt, TransportError> {
        self.check_available()?;
        tracing::info!(user_id = %message.user_id, "message queued");
        self.messages.write().await.push(message);
        Ok(MessageReceipt {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
        })
    }
}
