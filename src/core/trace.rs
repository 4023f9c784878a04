//! 请求级追踪记录器
//!
//! 每次 dispatch 一个 TraceRecorder，事件按 push 顺序追加；可选 TraceSink 负责持久化，
//! sink 失败只记日志，绝不影响调度结果。

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// 单条追踪事件
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub payload: Value,
}

/// 追踪事件落地（日志、存储等）
pub trait TraceSink: Send + Sync {
    fn record(&self, trace_id: &str, event: &TraceEvent) -> Result<(), String>;
}

/// 以 tracing debug 日志输出每条事件
#[derive(Debug, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, trace_id: &str, event: &TraceEvent) -> Result<(), String> {
        tracing::debug!(trace_id = %trace_id, event = %event.name, payload = %event.payload, "trace");
        Ok(())
    }
}

/// 内存 sink（测试用）：保存 (trace_id, 事件名)
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<(String, String)>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, trace_id: &str, event: &TraceEvent) -> Result<(), String> {
        let mut events = self.events.lock().map_err(|e| e.to_string())?;
        events.push((trace_id.to_string(), event.name.clone()));
        Ok(())
    }
}

/// 追踪记录器：只追加，不修改已有事件
pub struct TraceRecorder {
    id: String,
    events: Mutex<Vec<TraceEvent>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl TraceRecorder {
    pub fn new(sink: Option<Arc<dyn TraceSink>>) -> Self {
        Self::with_id(format!("trace-{}", uuid::Uuid::new_v4()), sink)
    }

    pub fn with_id(id: impl Into<String>, sink: Option<Arc<dyn TraceSink>>) -> Self {
        Self {
            id: id.into(),
            events: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push(&self, name: &str, payload: Value) {
        let event = TraceEvent {
            timestamp: Utc::now(),
            name: name.to_string(),
            payload,
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&self.id, &event) {
                tracing::warn!(trace_id = %self.id, event = %event.name, "trace sink failed: {}", e);
            }
        }

        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }
}
