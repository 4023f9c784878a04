//! 随访调度：时间计算、延迟任务队列、到期任务轮询

pub mod jobs;
pub mod poller;
pub mod schedule;

pub use jobs::{InMemoryJobQueue, JobId, JobMetadata, JobQueue, JobStatus, NewJob, ScheduledJob, SchedulerError};
pub use poller::{FollowUpPoller, PollSummary};
pub use schedule::{compute_next_check_in, describe_schedule, parse_timezone, Cadence, CheckInRequest, ScheduleError};
