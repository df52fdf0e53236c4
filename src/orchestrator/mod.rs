//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `controller` - 工作流控制器
//! - 持有运行状态，驱动案件循环
//! - 提供 start / pause / resume / continueNext / stop / status
//! - 汇总错误，识别会话丢失等致命情况
//!
//! ### `app` - 应用启动器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 持有 Browser，装配文档适配器、队列、审计与处理器
//! - 启动 HTTP 控制接口
//!
//! ## 层次关系
//!
//! ```text
//! app (Browser + HTTP)
//!     ↓
//! controller (案件循环)
//!     ↓
//! workflow::ItemProcessor (单条案件)
//!     ↓
//! navigation / verification (能力层：翻页 / 操作确认)
//!     ↓
//! infrastructure (基础设施：DocumentPort / JsExecutor)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一会话**：同一时刻只有一个 DocumentPort，案件严格按顺序处理
//! 2. **资源隔离**：只有编排层持有 Browser
//! 3. **向下依赖**：编排层 → workflow → 能力层 → infrastructure

pub mod app;
pub mod controller;

// 重新导出主要类型
pub use app::App;
pub use controller::{Collaborators, WorkflowController};
