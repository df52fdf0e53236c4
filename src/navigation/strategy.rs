//! 翻页策略与结果类型

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::{ElementDescriptor, Role};

/// 翻页策略，按尝试顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// 分页器中直接可见目标页码
    DirectLocate,
    /// 改写地址中的分页参数
    DirectAddress,
    /// 跳到最近的可见页码再逐页走
    JumpAndWalk,
    /// 跳到末页再倒着走
    ReverseFromEnd,
    /// 从当前位置逐页走
    IncrementalWalk,
}

impl StrategyKind {
    pub const CHAIN: [StrategyKind; 5] = [
        StrategyKind::DirectLocate,
        StrategyKind::DirectAddress,
        StrategyKind::JumpAndWalk,
        StrategyKind::ReverseFromEnd,
        StrategyKind::IncrementalWalk,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::DirectLocate => "直接定位",
            StrategyKind::DirectAddress => "地址改写",
            StrategyKind::JumpAndWalk => "跳转后逐页",
            StrategyKind::ReverseFromEnd => "末页倒序",
            StrategyKind::IncrementalWalk => "逐页前进",
        };
        f.write_str(name)
    }
}

/// 翻页目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationTarget {
    pub page_number: u32,
    /// 已知的总页数（未知时引擎会尝试从"末页"控件读取）
    #[serde(default)]
    pub total_pages: Option<u32>,
}

impl NavigationTarget {
    pub fn page(page_number: u32) -> Self {
        Self {
            page_number,
            total_pages: None,
        }
    }

    pub fn with_total(mut self, total_pages: u32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }

    /// 与当前页的距离
    pub fn distance_from(&self, current: u32) -> u32 {
        self.page_number.abs_diff(current)
    }
}

/// 成功到达
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reached {
    pub page: u32,
    /// 生效的策略；本来就在目标页时为 None
    pub strategy: Option<StrategyKind>,
    /// 依次尝试过的策略
    pub tried: Vec<StrategyKind>,
    /// 执行的点击/导航次数
    pub actions: u32,
}

/// 未能到达
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotReached {
    #[error("目标页码非法: {0}")]
    InvalidTarget(u32),

    #[error("会话丢失: {address}")]
    SessionLost { address: String },

    #[error("所有策略均未到达第 {target} 页 (已尝试: {tried:?})")]
    Exhausted {
        target: u32,
        tried: Vec<StrategyKind>,
    },

    #[error("策略 {strategy} 声称到达第 {target} 页，但校验结果为 {observed}")]
    Mismatch {
        target: u32,
        strategy: StrategyKind,
        observed: String,
    },

    #[error("翻页被停止")]
    Stopped,
}

impl NotReached {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, NotReached::SessionLost { .. })
    }
}

/// 分页器中各部件的描述符
///
/// `page_link` 文本中的 `{page}` 会被替换为具体页码。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerLayout {
    pub container: ElementDescriptor,
    pub page_link: ElementDescriptor,
    pub current: ElementDescriptor,
    pub next: ElementDescriptor,
    pub previous: ElementDescriptor,
    pub last: ElementDescriptor,
    pub results: ElementDescriptor,
}

impl Default for PagerLayout {
    fn default() -> Self {
        Self {
            container: ElementDescriptor::new(Role::Pager),
            page_link: ElementDescriptor::new(Role::PageLink).with_text("{page}"),
            current: ElementDescriptor::new(Role::CurrentPage),
            next: ElementDescriptor::new(Role::NextPage),
            previous: ElementDescriptor::new(Role::PreviousPage),
            last: ElementDescriptor::new(Role::LastPage),
            results: ElementDescriptor::new(Role::Results),
        }
    }
}

impl PagerLayout {
    pub fn page_link(&self, page: u32) -> ElementDescriptor {
        self.page_link.substitute("{page}", &page.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_link_fills_placeholder() {
        let layout = PagerLayout::default();
        let link = layout.page_link(7);
        assert_eq!(link.role, Role::PageLink);
        assert_eq!(link.text.as_deref(), Some("7"));
    }

    #[test]
    fn distance_is_symmetric() {
        assert_eq!(NavigationTarget::page(3).distance_from(10), 7);
        assert_eq!(NavigationTarget::page(10).distance_from(3), 7);
    }
}
