//! 工作流依赖的外部端口
//!
//! 队列、审计和单条案件处理器都以 trait 注入控制器，
//! 控制器本身不关心案件来自哪里、结果写到哪里。

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppResult;
use crate::workflow::item_ctx::ItemCtx;
use crate::workflow::state::WorkItemResult;

/// 待处理案件来源
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// 取下一条案件，没有时返回 `None`
    async fn next(&self) -> anyhow::Result<Option<String>>;

    /// 本周期内是否已经处理过（失败或超时按"未处理"对待）
    async fn was_handled_this_period(&self, item_id: &str) -> anyhow::Result<bool>;

    /// 新一次运行开始前回到队首
    async fn reset(&self) {}
}

/// 审计记录
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, result: &WorkItemResult) -> anyhow::Result<()>;
}

/// 单条案件处理器
///
/// 内部使用翻页引擎与操作确认循环；会话丢失必须以
/// `AppError::SessionLost` 返回，其余失败写进 `ItemReport`。
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, ctx: &ItemCtx<'_>) -> AppResult<ItemReport>;
}

/// 处理器的结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub success: bool,
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}
