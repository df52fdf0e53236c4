//! 流程层（Workflow Layer）
//!
//! - `state` - 运行状态与单条结果
//! - `ports` - 队列、审计、处理器端口
//! - `item_ctx` - 单条案件的处理上下文
//! - `signal` - 停止/暂停的协作式信号

pub mod item_ctx;
pub mod ports;
pub mod signal;
pub mod state;

pub use item_ctx::ItemCtx;
pub use ports::{AuditSink, ItemProcessor, ItemReport, WorkItemSource};
pub use signal::{ControlHandle, StopProbe, WaitOutcome};
pub use state::{RunMode, RunStatus, WorkItemResult, WorkflowState};
