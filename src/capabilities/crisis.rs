//! crisis.escalate：危机流程的指定能力
//!
//! 策略改道的落点；从不要求同意，也不依赖存储，保证在任何情况下都能返回求助资源。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError};
use crate::policy::{detect_crisis_terms, CRISIS_RESOURCES};

pub struct CrisisEscalate;

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrisisEscalateInput {
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisResource {
    pub name: String,
    pub contact: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisEscalateOutput {
    pub message: String,
    pub resources: Vec<CrisisResource>,
    pub detected_terms: Vec<String>,
}

fn resources() -> Vec<CrisisResource> {
    [
        ("988 Suicide & Crisis Lifeline", "call or text 988"),
        ("Crisis Text Line", "text HOME to 741741"),
        ("Emergency services", "call 911"),
    ]
    .into_iter()
    .map(|(name, contact)| CrisisResource {
        name: name.to_string(),
        contact: contact.to_string(),
    })
    .collect()
}

#[async_trait]
impl Capability for CrisisEscalate {
    type Input = CrisisEscalateInput;
    type Output = CrisisEscalateOutput;

    fn name(&self) -> &'static str {
        "crisis.escalate"
    }

    fn description(&self) -> &'static str {
        "Respond to a crisis signal with immediate safety resources"
    }

    async fn run(&self, input: CrisisEscalateInput, ctx: &ExecutionContext) -> Result<CrisisEscalateOutput, CapabilityError> {
        let text = input.text.as_deref().unwrap_or(&ctx.turn.text);
        let detected_terms = detect_crisis_terms(text);
        tracing::warn!(
            user_id = %ctx.user_id,
            trace_id = %ctx.trace_id(),
            terms = ?detected_terms,
            "crisis escalation"
        );
        Ok(CrisisEscalateOutput {
            message: CRISIS_RESOURCES.to_string(),
            resources: resources(),
            detected_terms,
        })
    }
}
