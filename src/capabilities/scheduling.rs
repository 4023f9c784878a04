//! 随访能力：schedule.checkIn 入队周期任务，checkin.deliver 在任务到期时发送消息

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capabilities::context::{Channel, ExecutionContext};
use crate::capabilities::registry::{Capability, CapabilityError, Hint};
use crate::ports::OutboundMessage;
use crate::scheduler::{compute_next_check_in, describe_schedule, Cadence, CheckInRequest, JobMetadata, NewJob};

pub const DELIVER_CAPABILITY: &str = "checkin.deliver";

const DEFAULT_CHECK_IN_MESSAGE: &str = "Checking in: how are you holding up today? Reply any time.";

/// schedule.checkIn
pub struct ScheduleCheckIn;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleCheckInInput {
    /// IANA 时区名，缺省取配置
    pub timezone: Option<String>,
    pub cadence: Cadence,
    #[schemars(range(max = 23))]
    pub preferred_hour: Option<u32>,
    #[schemars(range(max = 59))]
    pub preferred_minute: Option<u32>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCheckInOutput {
    pub job_id: String,
    pub run_at: DateTime<Utc>,
    pub description: String,
}

#[async_trait]
impl Capability for ScheduleCheckIn {
    type Input = ScheduleCheckInInput;
    type Output = ScheduleCheckInOutput;

    fn name(&self) -> &'static str {
        "schedule.checkIn"
    }

    fn description(&self) -> &'static str {
        "Schedule recurring check-in messages at the caregiver's preferred local time"
    }

    fn requires_consent(&self) -> bool {
        true
    }

    fn cost_hint(&self) -> Hint {
        Hint::Medium
    }

    async fn run(
        &self,
        input: ScheduleCheckInInput,
        ctx: &ExecutionContext,
    ) -> Result<ScheduleCheckInOutput, CapabilityError> {
        let request = CheckInRequest {
            timezone: input
                .timezone
                .unwrap_or_else(|| ctx.check_in.timezone.clone()),
            cadence: input.cadence,
            preferred_hour: input.preferred_hour.or(Some(ctx.check_in.hour)),
            preferred_minute: input.preferred_minute,
        };
        let run_at = compute_next_check_in(&request, ctx.now)?;
        let description = describe_schedule(&request, run_at);

        let payload = match input.message {
            Some(message) => json!({ "message": message }),
            None => json!({}),
        };
        let job_id = ctx
            .scheduler
            .enqueue(NewJob {
                job_type: DELIVER_CAPABILITY.to_string(),
                payload,
                run_at,
                metadata: JobMetadata {
                    user_id: ctx.user_id.clone(),
                    timezone: Some(request.timezone.clone()),
                    recurrence: Some(request),
                    supersedes: None,
                    trace_id: Some(ctx.trace_id().to_string()),
                },
            })
            .await?;

        Ok(ScheduleCheckInOutput {
            job_id,
            run_at,
            description,
        })
    }
}

/// checkin.deliver
pub struct DeliverCheckIn;

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeliverCheckInInput {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverCheckInOutput {
    pub message_id: String,
}

#[async_trait]
impl Capability for DeliverCheckIn {
    type Input = DeliverCheckInInput;
    type Output = DeliverCheckInOutput;

    fn name(&self) -> &'static str {
        DELIVER_CAPABILITY
    }

    fn description(&self) -> &'static str {
        "Send a check-in SMS to the caregiver"
    }

    fn latency_hint(&self) -> Hint {
        Hint::Medium
    }

    async fn run(&self, input: DeliverCheckInInput, ctx: &ExecutionContext) -> Result<DeliverCheckInOutput, CapabilityError> {
        let receipt = ctx
            .transport
            .send_message(OutboundMessage {
                user_id: ctx.user_id.clone(),
                channel: Channel::Sms,
                text: input
                    .message
                    .unwrap_or_else(|| DEFAULT_CHECK_IN_MESSAGE.to_string()),
            })
            .await?;
        Ok(DeliverCheckInOutput { message_id: receipt.id })
    }
}
