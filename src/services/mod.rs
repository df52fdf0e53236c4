//! 业务能力层（Services）
//!
//! - `audit_log` - JSON Lines 审计日志，兼做"今日已处理"查询
//! - `item_queue` - TOML 案件队列
//! - `action_plan` - 按 TOML 计划处理单条案件

pub mod action_plan;
pub mod audit_log;
pub mod item_queue;

pub use action_plan::{ActionPlan, PlanProcessor, PlanStep, StepCheck};
pub use audit_log::{AuditRecord, JsonlAuditLog};
pub use item_queue::{QueueItem, TomlItemSource};
