//! email.send：发送邮件并记录投递结果（含 trace id）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError, Hint};
use crate::ports::{DeliveryStatus, EmailDeliveryLog, EmailRequest};

pub struct SendEmail;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendEmailInput {
    #[schemars(email)]
    pub to: String,
    #[schemars(length(min = 1, max = 200))]
    pub subject: String,
    #[schemars(length(min = 1))]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendEmailOutput {
    pub id: String,
}

#[async_trait]
impl Capability for SendEmail {
    type Input = SendEmailInput;
    type Output = SendEmailOutput;

    fn name(&self) -> &'static str {
        "email.send"
    }

    fn description(&self) -> &'static str {
        "Send an email to the caregiver"
    }

    fn requires_consent(&self) -> bool {
        true
    }

    fn cost_hint(&self) -> Hint {
        Hint::Medium
    }

    fn latency_hint(&self) -> Hint {
        Hint::High
    }

    async fn run(&self, input: SendEmailInput, ctx: &ExecutionContext) -> Result<SendEmailOutput, CapabilityError> {
        let sent = ctx
            .transport
            .send_email(EmailRequest {
                to: input.to.clone(),
                subject: input.subject.clone(),
                text: input.text,
            })
            .await;

        let log = EmailDeliveryLog {
            user_id: Some(ctx.user_id.clone()),
            to: input.to,
            subject: input.subject,
            status: if sent.is_ok() {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            trace_id: ctx.trace_id().to_string(),
        };
        // 邮件已发出时，记录失败不影响结果
        if let Err(e) = ctx.store.log_email_delivery(log).await {
            tracing::warn!(trace_id = %ctx.trace_id(), error = %e, "email delivery log not written");
        }

        let receipt = sent?;
        Ok(SendEmailOutput { id: receipt.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::Fixture;
    use crate::capabilities::TurnContext;

    fn input() -> SendEmailInput {
        SendEmailInput {
            to: "care@example.com".to_string(),
            subject: "Your weekly summary".to_string(),
            text: "Here is how the week went.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_logs_sent_with_trace_id() {
        let fixture = Fixture::new();
        let ctx = fixture.context(TurnContext::new("u1").consented());
        SendEmail.run(input(), &ctx).await.unwrap();

        let log = fixture.store.email_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, DeliveryStatus::Sent);
        assert_eq!(log[0].trace_id, ctx.trace_id());
        assert_eq!(fixture.transport.emails().await.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_outage_logged_as_failed() {
        let fixture = Fixture::new();
        fixture.transport.fail_next(1);
        let ctx = fixture.context(TurnContext::new("u1").consented());
        let err = SendEmail.run(input(), &ctx).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Transient(_)));

        let log = fixture.store.email_log().await;
        assert_eq!(log[0].status, DeliveryStatus::Failed);
    }
}
