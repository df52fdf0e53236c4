//! 案件处理上下文
//!
//! 封装"我正在处理第几条、哪个案件"，以及处理器可用的能力

use std::fmt::Display;

use crate::infrastructure::DocumentPort;
use crate::navigation::NavigationEngine;
use crate::verification::ActionVerifier;
use crate::workflow::signal::StopProbe;

/// 案件处理上下文
///
/// 所有能力都以借用方式传入，会话只有控制器一个所有者
pub struct ItemCtx<'a> {
    /// 案件 ID
    pub item_id: &'a str,

    /// 本次运行中的序号（从1开始，仅用于日志显示）
    pub index: usize,

    pub document: &'a dyn DocumentPort,
    pub navigator: &'a NavigationEngine,
    pub verifier: &'a ActionVerifier,
    pub stop: StopProbe,
}

impl<'a> ItemCtx<'a> {
    /// 创建新的案件上下文
    pub fn new(
        item_id: &'a str,
        index: usize,
        document: &'a dyn DocumentPort,
        navigator: &'a NavigationEngine,
        verifier: &'a ActionVerifier,
        stop: StopProbe,
    ) -> Self {
        Self {
            item_id,
            index,
            document,
            navigator,
            verifier,
            stop,
        }
    }
}

impl Display for ItemCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[案件 {} 序号#{}]", self.item_id, self.index)
    }
}
