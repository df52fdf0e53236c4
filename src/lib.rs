//! # Case Portal Flow
//!
//! 一个在没有 API 的案件门户上自动执行"翻页 → 打开案件 → 可确认的操作"的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - `DocumentPort` 抽象与唯一的 page owner `JsExecutor`
//! - `browser/` - 连接/启动浏览器，`CdpDocument` 把描述符翻译为 DOM 操作
//!
//! ### ② 能力层（Capabilities）
//! - `navigation/` - 翻页策略引擎（直接定位 → 地址改写 → 跳转后逐页 → 从末页倒走 → 逐页）
//! - `verification/` - 操作确认循环（点击 → 稳定 → 校验，失败退避并升级点击方式）
//! - `services/` - 案件队列、审计日志、按计划处理单条案件
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 运行状态、外部端口、案件上下文、停止/暂停信号
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/controller` - 工作流控制器，驱动案件循环
//! - `orchestrator/app` - 装配全部组件并启动 HTTP 控制接口
//!
//! ## 模块结构

pub mod api;
pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod navigation;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod verification;
pub mod workflow;

// 重新导出常用类型
pub use browser::connect_to_browser_and_page;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{DocumentPort, ElementDescriptor, JsExecutor, Role, Technique};
pub use navigation::{NavigationEngine, NavigationTarget};
pub use orchestrator::{App, Collaborators, WorkflowController};
pub use verification::ActionVerifier;
pub use workflow::{RunMode, RunStatus, WorkflowState};
