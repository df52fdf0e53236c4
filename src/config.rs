//! 程序配置
//!
//! 加载顺序：`Config::default()` → TOML 文件 → 环境变量覆盖。
//! 重试次数、退避时长、跳页阈值等常量都是经验值，全部保留为可配置的默认值。

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ConfigError};
use crate::navigation::PagerLayout;

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否启动无头浏览器（否则连接已有浏览器）
    pub headless: bool,
    /// 无头模式下的浏览器可执行文件
    pub chrome_executable: Option<String>,
    /// 列表页地址
    pub listing_url: String,
    /// 期望停留的域名，离开即视为会话丢失
    pub expected_domain: String,
    /// 登录页特征（出现在 URL 中）
    pub login_markers: Vec<String>,
    /// 待处理案件队列文件
    pub queue_file: String,
    /// 单条案件的操作计划文件
    pub plan_file: String,
    /// 审计日志文件（JSON Lines）
    pub audit_log_file: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// HTTP 控制端口
    pub http_port: u16,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 角色 → CSS 选择器覆盖表（由浏览器适配层解释）
    pub selectors: BTreeMap<String, String>,
    /// 忙碌指示器选择器（存在即视为页面未稳定）
    pub busy_indicator: Option<String>,

    pub navigation: NavigationSettings,
    pub verification: VerificationSettings,
    pub workflow: WorkflowSettings,
    /// 列表分页器的描述符
    pub pager: PagerLayout,
}

/// 翻页相关参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSettings {
    /// 距离超过该值才尝试"跳到最近页码再逐页走"
    pub jump_threshold: u32,
    /// 每次翻页后等待页面稳定的超时
    pub settle_timeout_ms: u64,
    /// 地址中的分页参数名
    pub page_param: String,
}

/// 操作确认循环参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    pub max_attempts: u32,
    /// 线性退避基数：第 n 次失败后等待 n * base_delay
    pub base_delay_ms: u64,
    /// 确认弹窗出现/消失的超时
    pub modal_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    /// 等待确认框出现/消失时的轮询间隔
    pub poll_interval_ms: u64,
}

/// 工作流控制参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// 自动模式下两条案件之间的间隔
    pub inter_item_delay_ms: u64,
    /// 协作式等待的轮询间隔
    pub poll_interval_ms: u64,
    pub continue_on_error: bool,
    /// 状态中保留的最近错误条数
    pub max_errors_surfaced: usize,
    /// "今日已处理"检查的超时
    pub idempotency_timeout_ms: u64,
    /// stop() 等待后台任务退出的宽限时间
    pub stop_grace_ms: u64,
    pub settle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 9222,
            headless: false,
            chrome_executable: None,
            listing_url: "https://portal.example.com/cases?page=1".to_string(),
            expected_domain: "portal.example.com".to_string(),
            login_markers: vec!["login".into(), "signin".into(), "sso".into()],
            queue_file: "queue.toml".to_string(),
            plan_file: "plan.toml".to_string(),
            audit_log_file: "audit/audit.jsonl".to_string(),
            output_log_file: "output.txt".to_string(),
            http_port: 8080,
            verbose_logging: false,
            selectors: BTreeMap::new(),
            busy_indicator: None,
            navigation: NavigationSettings::default(),
            verification: VerificationSettings::default(),
            workflow: WorkflowSettings::default(),
            pager: PagerLayout::default(),
        }
    }
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            jump_threshold: 5,
            settle_timeout_ms: 10_000,
            page_param: "page".to_string(),
        }
    }
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            modal_timeout_ms: 5_000,
            settle_timeout_ms: 10_000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: 2_000,
            poll_interval_ms: 250,
            continue_on_error: true,
            max_errors_surfaced: 50,
            idempotency_timeout_ms: 3_000,
            stop_grace_ms: 5_000,
            settle_timeout_ms: 10_000,
        }
    }
}

impl NavigationSettings {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

impl VerificationSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn modal_timeout(&self) -> Duration {
        Duration::from_millis(self.modal_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl WorkflowSettings {
    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idempotency_timeout(&self) -> Duration {
        Duration::from_millis(self.idempotency_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// 从 TOML 文件加载（缺省字段取默认值）
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AppError::file(path.display().to_string(), e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            crate::error::AppError::Config(ConfigError::FileParseFailed { message, .. }) => {
                ConfigError::FileParseFailed {
                    path: path.display().to_string(),
                    message,
                }
                .into()
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 用环境变量覆盖当前配置
    pub fn apply_env(&mut self) -> AppResult<()> {
        if let Some(v) = env_parse::<u16>("BROWSER_DEBUG_PORT")? {
            self.browser_debug_port = v;
        }
        if let Some(v) = env_parse::<bool>("HEADLESS")? {
            self.headless = v;
        }
        if let Ok(v) = std::env::var("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(v);
        }
        if let Ok(v) = std::env::var("LISTING_URL") {
            self.listing_url = v;
        }
        if let Ok(v) = std::env::var("EXPECTED_DOMAIN") {
            self.expected_domain = v;
        }
        if let Ok(v) = std::env::var("QUEUE_FILE") {
            self.queue_file = v;
        }
        if let Ok(v) = std::env::var("PLAN_FILE") {
            self.plan_file = v;
        }
        if let Ok(v) = std::env::var("AUDIT_LOG_FILE") {
            self.audit_log_file = v;
        }
        if let Ok(v) = std::env::var("OUTPUT_LOG_FILE") {
            self.output_log_file = v;
        }
        if let Some(v) = env_parse::<u16>("HTTP_PORT")? {
            self.http_port = v;
        }
        if let Some(v) = env_parse::<bool>("VERBOSE_LOGGING")? {
            self.verbose_logging = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_ATTEMPTS")? {
            self.verification.max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("BASE_DELAY_MS")? {
            self.verification.base_delay_ms = v;
        }
        if let Some(v) = env_parse::<u32>("JUMP_THRESHOLD")? {
            self.navigation.jump_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("INTER_ITEM_DELAY_MS")? {
            self.workflow.inter_item_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("POLL_INTERVAL_MS")? {
            self.workflow.poll_interval_ms = v;
        }
        if let Some(v) = env_parse::<bool>("CONTINUE_ON_ERROR")? {
            self.workflow.continue_on_error = v;
        }
        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        if self.verification.max_attempts == 0 {
            return Err(invalid("verification.max_attempts", "必须大于 0"));
        }
        if self.workflow.poll_interval_ms == 0 {
            return Err(invalid("workflow.poll_interval_ms", "必须大于 0"));
        }
        if self.listing_url.trim().is_empty() {
            return Err(invalid("listing_url", "不能为空"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::AppError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn env_parse<T: FromStr>(var_name: &str) -> AppResult<Option<T>> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}
