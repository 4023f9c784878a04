//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HARNESS__*` 覆盖（双下划线表示嵌套，如 `HARNESS__DISPATCH__DEFAULT_AGENT=crisis`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::capabilities::CheckInDefaults;
use crate::core::RetryPolicy;
use crate::scheduler::schedule::{DEFAULT_HOUR, DEFAULT_TIMEZONE};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub dispatch: DispatchSection,
    pub policy: PolicySection,
    pub scheduler: SchedulerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [dispatch] 段：未指定 agent 时使用的默认 Agent、调用方重试建议参数
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_agent() -> String {
    "main".to_string()
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            retry: RetryPolicy::default(),
        }
    }
}

/// [policy] 段：策略包目录与生效的包
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    /// 额外策略包目录（*.toml），按文件名排序加载
    pub bundle_dir: Option<PathBuf>,
    /// 生效的包名（按顺序求值）；为空表示全部已加载的包
    #[serde(default)]
    pub active_bundles: Vec<String>,
    /// 是否加载内置的 trauma_informed_v1
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,
}

fn default_include_builtin() -> bool {
    true
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            bundle_dir: None,
            active_bundles: Vec::new(),
            include_builtin: default_include_builtin(),
        }
    }
}

/// [scheduler] 段：随访默认时间与轮询参数
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_hour")]
    pub default_hour: u32,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 每轮最多取出的到期任务数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_hour() -> u32 {
    DEFAULT_HOUR
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    25
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            default_hour: default_hour(),
            default_timezone: default_timezone(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl SchedulerSection {
    pub fn check_in_defaults(&self) -> CheckInDefaults {
        CheckInDefaults {
            hour: self.default_hour,
            timezone: self.default_timezone.clone(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HARNESS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HARNESS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HARNESS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
