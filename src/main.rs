//! care-harness 命令行入口
//!
//! - `care-harness --list`：打印能力清单（JSON）
//! - `care-harness <capability> [input-json] [turn-json]`：调度一次并打印报告
//! - 无参数：运行随访轮询器，Ctrl+C 退出

use std::sync::Arc;

use anyhow::Context;
use care_harness::capabilities::{Channel, TurnContext};
use care_harness::config::load_config;
use care_harness::core::{DispatchRequest, Dispatcher, ToolCallCounter, TracingSink};
use care_harness::observability;
use care_harness::policy::PolicyStore;
use care_harness::ports::{Clock, InMemoryStore, SystemClock};
use care_harness::scheduler::{FollowUpPoller, InMemoryJobQueue};
use care_harness::services::Services;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let policies = PolicyStore::from_config(&cfg.policy).context("Failed to load policy bundles")?;

    let services = Services::builtin();
    let store = Arc::new(InMemoryStore::new(services.assessment.clone()));
    let queue = Arc::new(InMemoryJobQueue::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .config(&cfg)
            .policies(Arc::new(policies))
            .store(store)
            .services(services)
            .scheduler(queue.clone())
            .clock(clock.clone())
            .trace_sink(Arc::new(TracingSink))
            .build(),
    );

    let mut args = std::env::args().skip(1);
    if let Some(capability) = args.next() {
        if capability == "--list" {
            println!("{}", dispatcher.registry().to_schema_json());
            return Ok(());
        }

        let input: Value = match args.next() {
            Some(raw) => serde_json::from_str(&raw).context("Input must be valid JSON")?,
            None => Value::Null,
        };
        let turn: TurnContext = match args.next() {
            Some(raw) => serde_json::from_str(&raw).context("Turn context must be valid JSON")?,
            None => TurnContext::new("cli-user").with_channel(Channel::Web),
        };

        let counter = ToolCallCounter::new();
        let report = dispatcher
            .dispatch(DispatchRequest::new(capability, input), turn, &counter)
            .await;
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        if !report.is_ok() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let poller = FollowUpPoller::new(queue, dispatcher, clock).with_config(&cfg.scheduler);
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let token = token.clone();
        async move { poller.run(token).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown signal received");
    token.cancel();
    handle.await.context("Poller task failed")?;
    Ok(())
}
