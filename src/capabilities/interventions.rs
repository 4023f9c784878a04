//! interventions.suggest

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError};
use crate::services::{PressureZone, RankedIntervention};

const DEFAULT_LIMIT: usize = 3;
const MAX_LIMIT: usize = 20;

pub struct SuggestInterventions;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SuggestInterventionsInput {
    #[schemars(length(min = 1))]
    pub pressure_zones: Vec<PressureZone>,
    pub limit: Option<usize>,
}

#[async_trait]
impl Capability for SuggestInterventions {
    type Input = SuggestInterventionsInput;
    type Output = Vec<RankedIntervention>;

    fn name(&self) -> &'static str {
        "interventions.suggest"
    }

    fn description(&self) -> &'static str {
        "Suggest evidence-ranked interventions for the caregiver's pressure zones"
    }

    async fn run(
        &self,
        input: SuggestInterventionsInput,
        ctx: &ExecutionContext,
    ) -> Result<Vec<RankedIntervention>, CapabilityError> {
        let limit = input.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Ok(ctx.services.interventions.rank(&input.pressure_zones, Some(limit)))
    }
}
