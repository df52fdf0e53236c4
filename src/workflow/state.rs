//! 运行状态
//!
//! `WorkflowState` 只由控制器通过下面的转换方法修改，
//! 外部读取的永远是克隆出来的快照。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 运行状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Navigating,
    Processing,
    Paused,
    Completed,
    Error,
}

impl RunStatus {
    /// 终态：只能通过新的 start 离开
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Navigating | RunStatus::Processing | RunStatus::Paused
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Navigating => "navigating",
            RunStatus::Processing => "processing",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 运行模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// 每处理完一条就暂停，等待操作员放行
    Manual,
    #[default]
    Automatic,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(RunMode::Manual),
            "automatic" | "auto" => Ok(RunMode::Automatic),
            other => Err(format!("未知的运行模式: {}", other)),
        }
    }
}

/// 工作流状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub status: RunStatus,
    pub mode: RunMode,
    pub current_item_id: Option<String>,
    pub processed_count: u32,
    pub total_seen: u32,
    pub skipped_count: u32,
    pub failed_count: u32,
    /// 最近的错误（条数有上限）
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,
    /// 当前状态最具体的原因，例如"等待操作员"或"会话丢失"
    pub status_reason: Option<String>,
}

impl WorkflowState {
    /// 新的一次运行：清空计数与错误
    pub(crate) fn begin(&mut self, mode: RunMode) {
        *self = WorkflowState {
            status: RunStatus::Navigating,
            mode,
            started_at: Some(Local::now()),
            ..WorkflowState::default()
        };
    }

    pub(crate) fn navigating(&mut self) {
        self.status = RunStatus::Navigating;
        self.current_item_id = None;
        self.status_reason = None;
    }

    pub(crate) fn saw_item(&mut self) {
        self.total_seen += 1;
    }

    pub(crate) fn skipped(&mut self) {
        self.skipped_count += 1;
    }

    pub(crate) fn processing(&mut self, item_id: &str) {
        self.status = RunStatus::Processing;
        self.current_item_id = Some(item_id.to_string());
        self.status_reason = None;
    }

    /// 一条案件处理结束（无论成败都计入 processed_count）
    pub(crate) fn item_finished(&mut self, error: Option<String>, max_errors: usize) {
        self.processed_count += 1;
        if let Some(error) = error {
            self.failed_count += 1;
            self.push_error(error, max_errors);
        }
    }

    /// 只能从 processing 进入
    pub(crate) fn paused(&mut self, reason: &str) -> bool {
        if self.status != RunStatus::Processing {
            return false;
        }
        self.status = RunStatus::Paused;
        self.status_reason = Some(reason.to_string());
        true
    }

    pub(crate) fn resumed(&mut self) -> bool {
        if self.status != RunStatus::Paused {
            return false;
        }
        self.navigating();
        true
    }

    pub(crate) fn complete(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Completed;
        self.current_item_id = None;
        self.status_reason = None;
        self.ended_at = Some(Local::now());
    }

    pub(crate) fn fail(&mut self, reason: String, max_errors: usize) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Error;
        self.current_item_id = None;
        self.push_error(reason.clone(), max_errors);
        self.status_reason = Some(reason);
        self.ended_at = Some(Local::now());
    }

    /// 操作员停止：终态保持不变
    pub(crate) fn stopped(&mut self) {
        if !self.status.is_terminal() {
            self.status = RunStatus::Idle;
            self.current_item_id = None;
            self.status_reason = Some("stopped by operator".to_string());
        }
        if self.ended_at.is_none() {
            self.ended_at = Some(Local::now());
        }
    }

    fn push_error(&mut self, error: String, max_errors: usize) {
        self.errors.push(error);
        let max_errors = max_errors.max(1);
        if self.errors.len() > max_errors {
            let overflow = self.errors.len() - max_errors;
            self.errors.drain(..overflow);
        }
    }
}

/// 单条案件的处理结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemResult {
    item_id: String,
    success: bool,
    detail: Option<String>,
    skip_reason: Option<String>,
}

impl WorkItemResult {
    pub fn success(item_id: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: true,
            detail,
            skip_reason: None,
        }
    }

    pub fn failure(item_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            detail: Some(detail.into()),
            skip_reason: None,
        }
    }

    pub fn skipped(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            success: false,
            detail: None,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }
}
