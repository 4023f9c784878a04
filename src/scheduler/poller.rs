//! 随访轮询器
//!
//! 定期取出到期任务，构造合成轮次（channel = scheduled）后重新走 Dispatcher 的完整治理流水线。
//! 周期性任务无论本次调度成败都会入队下一次，并声明替换已消费的任务。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{Channel, TurnContext};
use crate::config::SchedulerSection;
use crate::core::{DispatchRequest, Dispatcher, ToolCallCounter};
use crate::ports::Clock;
use crate::scheduler::jobs::{JobMetadata, JobQueue, NewJob, ScheduledJob, SchedulerError};
use crate::scheduler::schedule::compute_next_check_in;

/// 一轮轮询的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    pub rescheduled: usize,
}

pub struct FollowUpPoller {
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    interval: Duration,
}

impl FollowUpPoller {
    pub fn new(queue: Arc<dyn JobQueue>, dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        let defaults = SchedulerSection::default();
        Self {
            queue,
            dispatcher,
            clock,
            batch_size: defaults.batch_size,
            interval: Duration::from_secs(defaults.poll_interval_secs),
        }
    }

    pub fn with_config(mut self, section: &SchedulerSection) -> Self {
        self.batch_size = section.batch_size.max(1);
        self.interval = Duration::from_secs(section.poll_interval_secs.max(1));
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 处理一批到期任务
    pub async fn poll_once(&self) -> Result<PollSummary, SchedulerError> {
        let now = self.clock.now();
        let jobs = self.queue.take_due(now, self.batch_size).await?;
        let mut summary = PollSummary {
            due: jobs.len(),
            ..PollSummary::default()
        };

        for job in jobs {
            if self.run_job(&job).await {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
            if self.reschedule(&job, now).await {
                summary.rescheduled += 1;
            }
        }

        if summary.due > 0 {
            tracing::info!(
                due = summary.due,
                completed = summary.completed,
                failed = summary.failed,
                rescheduled = summary.rescheduled,
                "follow-up poll"
            );
        }
        Ok(summary)
    }

    async fn run_job(&self, job: &ScheduledJob) -> bool {
        let mut turn = TurnContext::new(job.metadata.user_id.clone())
            .with_channel(Channel::Scheduled)
            .with_metadata("jobId", json!(job.id));
        if let Some(origin) = &job.metadata.trace_id {
            turn = turn.with_metadata("originTraceId", json!(origin));
        }

        // 每个任务是独立的一轮
        let counter = ToolCallCounter::new();
        let report = self
            .dispatcher
            .dispatch(
                DispatchRequest::new(job.job_type.clone(), job.payload.clone()),
                turn,
                &counter,
            )
            .await;

        if let Err(e) = &report.result {
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                trace_id = %report.trace_id,
                error = %e,
                "scheduled job failed"
            );
        }
        report.is_ok()
    }

    async fn reschedule(&self, job: &ScheduledJob, now: chrono::DateTime<chrono::Utc>) -> bool {
        let Some(recurrence) = &job.metadata.recurrence else {
            return false;
        };
        let run_at = match compute_next_check_in(recurrence, now) {
            Ok(run_at) => run_at,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "recurring job not rescheduled");
                return false;
            }
        };

        let next = NewJob {
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            run_at,
            metadata: JobMetadata {
                supersedes: Some(job.id.clone()),
                ..job.metadata.clone()
            },
        };
        match self.queue.enqueue(next).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "recurring job not rescheduled");
                false
            }
        }
    }

    /// 按固定间隔轮询，直到 token 被取消
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), batch_size = self.batch_size, "follow-up poller started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("follow-up poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "follow-up poll failed");
                    }
                }
            }
        }
    }
}
