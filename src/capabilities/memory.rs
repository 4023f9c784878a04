//! memory.record：保存关于用户的长期记忆

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError};
use crate::ports::MemoryEntry;

pub struct RecordMemory;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordMemoryInput {
    /// 如 care_routine / preference / intervention_result
    #[schemars(length(min = 1, max = 64))]
    pub category: String,
    #[schemars(length(min = 1, max = 2000))]
    pub content: String,
    #[schemars(range(min = 1, max = 5))]
    pub importance: u8,
}

#[derive(Debug, Serialize)]
pub struct RecordMemoryOutput {
    pub saved: bool,
}

#[async_trait]
impl Capability for RecordMemory {
    type Input = RecordMemoryInput;
    type Output = RecordMemoryOutput;

    fn name(&self) -> &'static str {
        "memory.record"
    }

    fn description(&self) -> &'static str {
        "Remember a fact about the caregiver (importance 1-5)"
    }

    async fn run(&self, input: RecordMemoryInput, ctx: &ExecutionContext) -> Result<RecordMemoryOutput, CapabilityError> {
        if !(1..=5).contains(&input.importance) {
            return Err(CapabilityError::InvalidArgument(format!(
                "importance must be 1-5, got {}",
                input.importance
            )));
        }
        ctx.store
            .save_memory_entry(MemoryEntry {
                user_id: ctx.user_id.clone(),
                category: input.category,
                content: input.content,
                importance: input.importance,
            })
            .await?;
        Ok(RecordMemoryOutput { saved: true })
    }
}
