//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（Page），只暴露能力：
//! - `document` - 核心依赖的 `DocumentPort` 抽象
//! - `js_executor` - 唯一的 page owner

pub mod document;
pub mod js_executor;

#[cfg(test)]
pub mod fake;

pub use document::{DocumentPort, ElementDescriptor, ElementRef, PageIdentity, Role, Technique};
pub use js_executor::JsExecutor;
