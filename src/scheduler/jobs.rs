//! 延迟任务队列
//!
//! 任务创建后不可原地修改；到期后由轮询器取走且只取走一次。
//! 替换旧任务 = 入队新任务并在 metadata.supersedes 中指明旧任务，旧任务视为已完成。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::scheduler::schedule::CheckInRequest;

pub type JobId = String;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub user_id: String,
    pub timezone: Option<String>,
    /// 周期性随访：消费后按此计算下一次
    pub recurrence: Option<CheckInRequest>,
    pub supersedes: Option<JobId>,
    /// 产生该任务的 trace
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    /// 到期后要调度的能力名
    pub job_type: String,
    pub payload: Value,
    pub run_at: DateTime<Utc>,
    pub metadata: JobMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub run_at: DateTime<Utc>,
    pub metadata: JobMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Consumed,
    Superseded,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, SchedulerError>;

    /// 取走所有 run_at <= now 的待执行任务（按 run_at 升序，至多 limit 个）
    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError>;

    async fn pending(&self) -> Result<Vec<ScheduledJob>, SchedulerError>;
}

/// 保留最近多少个已结束任务的状态（用于 status 查询与 supersedes 校验）
const FINISHED_HISTORY: usize = 1024;

#[derive(Default)]
struct QueueState {
    pending: HashMap<JobId, ScheduledJob>,
    finished: VecDeque<(JobId, JobStatus)>,
}

impl QueueState {
    fn finish(&mut self, id: JobId, status: JobStatus) {
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((id, status));
    }

    fn finished_status(&self, id: &str) -> Option<JobStatus> {
        self.finished
            .iter()
            .rev()
            .find(|(finished, _)| finished == id)
            .map(|(_, status)| *status)
    }
}

/// 内存任务队列：只保留待执行任务与有限的结束记录
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: RwLock<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self, id: &str) -> Option<JobStatus> {
        let state = self.state.read().await;
        if state.pending.contains_key(id) {
            return Some(JobStatus::Pending);
        }
        state.finished_status(id)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, SchedulerError> {
        let mut state = self.state.write().await;

        if let Some(old) = &job.metadata.supersedes {
            if state.pending.remove(old).is_some() {
                state.finish(old.clone(), JobStatus::Superseded);
            } else if state.finished_status(old).is_none() {
                return Err(SchedulerError::UnknownJob(old.clone()));
            }
        }

        let id = format!("job_{}", uuid::Uuid::new_v4());
        tracing::info!(job_id = %id, job_type = %job.job_type, run_at = %job.run_at, "job enqueued");
        state.pending.insert(
            id.clone(),
            ScheduledJob {
                id: id.clone(),
                job_type: job.job_type,
                payload: job.payload,
                run_at: job.run_at,
                metadata: job.metadata,
            },
        );
        Ok(id)
    }

    async fn take_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let mut state = self.state.write().await;
        let mut due: Vec<(DateTime<Utc>, JobId)> = state
            .pending
            .values()
            .filter(|job| job.run_at <= now)
            .map(|job| (job.run_at, job.id.clone()))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut taken = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(job) = state.pending.remove(&id) {
                state.finish(id, JobStatus::Consumed);
                taken.push(job);
            }
        }
        Ok(taken)
    }

    async fn pending(&self) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let state = self.state.read().await;
        let mut pending: Vec<ScheduledJob> = state.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }
}
