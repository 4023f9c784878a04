//! alerts.processPending：投递待处理告警
//!
//! 单条告警投递失败不影响其余告警；失败的告警保持待处理，下次再试。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capabilities::context::{Channel, ExecutionContext};
use crate::capabilities::registry::{Capability, CapabilityError, Hint};
use crate::ports::{AlertChannel, AlertDelivery, AlertRecord, EmailRequest, OutboundMessage};

const DEFAULT_BATCH: usize = 20;

pub struct ProcessPendingAlerts;

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessPendingAlertsInput {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessPendingAlertsOutput {
    pub processed: usize,
    pub failed: usize,
}

impl ProcessPendingAlerts {
    async fn deliver(alert: &AlertRecord, ctx: &ExecutionContext) -> Result<String, CapabilityError> {
        match alert.channel {
            AlertChannel::Email => {
                let to = alert
                    .recipient
                    .clone()
                    .ok_or_else(|| CapabilityError::Failed(format!("alert {} has no recipient", alert.id)))?;
                let receipt = ctx
                    .transport
                    .send_email(EmailRequest {
                        to,
                        subject: format!("[{}] {}", alert.kind, alert.message),
                        text: alert.message.clone(),
                    })
                    .await?;
                Ok(receipt.id)
            }
            AlertChannel::Sms => {
                let receipt = ctx
                    .transport
                    .send_message(OutboundMessage {
                        user_id: alert.user_id.clone(),
                        channel: Channel::Sms,
                        text: alert.message.clone(),
                    })
                    .await?;
                Ok(receipt.id)
            }
        }
    }
}

#[async_trait]
impl Capability for ProcessPendingAlerts {
    type Input = ProcessPendingAlertsInput;
    type Output = ProcessPendingAlertsOutput;

    fn name(&self) -> &'static str {
        "alerts.processPending"
    }

    fn description(&self) -> &'static str {
        "Deliver pending alerts over their channel and mark them processed"
    }

    fn cost_hint(&self) -> Hint {
        Hint::High
    }

    fn latency_hint(&self) -> Hint {
        Hint::High
    }

    async fn run(
        &self,
        input: ProcessPendingAlertsInput,
        ctx: &ExecutionContext,
    ) -> Result<ProcessPendingAlertsOutput, CapabilityError> {
        let alerts = ctx
            .store
            .fetch_pending_alerts(input.limit.unwrap_or(DEFAULT_BATCH))
            .await?;

        let mut summary = ProcessPendingAlertsOutput::default();
        for alert in &alerts {
            let receipt_id = match Self::deliver(alert, ctx).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(alert_id = %alert.id, error = %e, "alert delivery failed");
                    summary.failed += 1;
                    continue;
                }
            };
            let delivery = AlertDelivery {
                delivered_via: alert.channel,
                metadata: Some(json!({ "receiptId": receipt_id, "traceId": ctx.trace_id() })),
            };
            match ctx.store.mark_alert_processed(&alert.id, delivery).await {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    tracing::warn!(alert_id = %alert.id, error = %e, "alert not marked processed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::Fixture;
    use crate::capabilities::TurnContext;
    use crate::ports::AlertSeverity;

    fn alert(id: &str, channel: AlertChannel, recipient: Option<&str>) -> AlertRecord {
        AlertRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            kind: "burnout_high".to_string(),
            severity: AlertSeverity::High,
            channel,
            message: "Burnout score dropped sharply".to_string(),
            recipient: recipient.map(str::to_string),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn test_delivers_each_channel() {
        let fixture = Fixture::new();
        fixture.store.push_alert(alert("a1", AlertChannel::Sms, None)).await;
        fixture
            .store
            .push_alert(alert("a2", AlertChannel::Email, Some("care@example.com")))
            .await;
        fixture.store.push_alert(alert("a3", AlertChannel::Email, None)).await;

        let ctx = fixture.context(TurnContext::new("ops"));
        let out = ProcessPendingAlerts
            .run(ProcessPendingAlertsInput::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(out, ProcessPendingAlertsOutput { processed: 2, failed: 1 });

        let processed = fixture.store.processed_alerts().await;
        let ids: Vec<_> = processed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(fixture.transport.messages().await.len(), 1);
        assert_eq!(fixture.transport.emails().await.len(), 1);
    }
}
