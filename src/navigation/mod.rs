//! 翻页能力
//!
//! - `strategy` - 策略、目标与结果类型，分页器描述
//! - `engine` - 按固定顺序升级策略的翻页引擎

pub mod engine;
pub mod strategy;

pub use engine::{parse_page_param, rewrite_page_param, NavigationEngine};
pub use strategy::{NavigationTarget, NotReached, PagerLayout, Reached, StrategyKind};
