//! 运营类能力：admin.metrics、billing.refreshEntitlements（均无参）

use async_trait::async_trait;

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError, NoInput};
use crate::ports::{AdminMetrics, Entitlements};

pub struct AdminMetricsCapability;

#[async_trait]
impl Capability for AdminMetricsCapability {
    type Input = NoInput;
    type Output = AdminMetrics;

    fn name(&self) -> &'static str {
        "admin.metrics"
    }

    fn description(&self) -> &'static str {
        "Fetch operational metrics for the admin dashboard"
    }

    fn takes_input(&self) -> bool {
        false
    }

    async fn run(&self, _input: NoInput, ctx: &ExecutionContext) -> Result<AdminMetrics, CapabilityError> {
        Ok(ctx.store.get_admin_metrics().await?)
    }
}

pub struct RefreshEntitlements;

#[async_trait]
impl Capability for RefreshEntitlements {
    type Input = NoInput;
    type Output = Entitlements;

    fn name(&self) -> &'static str {
        "billing.refreshEntitlements"
    }

    fn description(&self) -> &'static str {
        "Refresh the caregiver's plan and entitlements"
    }

    fn takes_input(&self) -> bool {
        false
    }

    async fn run(&self, _input: NoInput, ctx: &ExecutionContext) -> Result<Entitlements, CapabilityError> {
        let entitlements = ctx.store.refresh_entitlements(&ctx.user_id).await?;
        tracing::debug!(user_id = %ctx.user_id, plan = %entitlements.plan, "entitlements refreshed");
        Ok(entitlements)
    }
}
