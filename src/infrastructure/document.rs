//! 文档端口 - 基础设施层
//!
//! 对"当前远端页面"的抽象。核心逻辑只通过 `ElementDescriptor`（角色 + 文本 + 属性提示）
//! 描述元素，具体选择器由适配层解释，核心从不关心查询语法。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 元素的语义角色
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Any,
    Link,
    Button,
    Input,
    Text,
    Row,
    Dialog,
    /// 分页器容器
    Pager,
    /// 分页器中的页码链接
    PageLink,
    /// 分页器中的当前页标记
    CurrentPage,
    NextPage,
    PreviousPage,
    LastPage,
    /// 结果列表容器（用于内容指纹）
    Results,
}

impl Role {
    /// 配置文件中 `[selectors]` 使用的键名
    pub fn key(&self) -> &'static str {
        match self {
            Role::Any => "any",
            Role::Link => "link",
            Role::Button => "button",
            Role::Input => "input",
            Role::Text => "text",
            Role::Row => "row",
            Role::Dialog => "dialog",
            Role::Pager => "pager",
            Role::PageLink => "page_link",
            Role::CurrentPage => "current_page",
            Role::NextPage => "next_page",
            Role::PreviousPage => "previous_page",
            Role::LastPage => "last_page",
            Role::Results => "results",
        }
    }
}

/// 元素描述符
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(default)]
    pub role: Role,
    /// 可见文本（去空白后精确匹配，`text_contains` 为真时包含匹配）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub text_contains: bool,
    /// 属性提示，例如 `aria-label`、`data-id`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ElementDescriptor {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self.text_contains = true;
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// 把文本中的 `{id}` 占位符替换为实际值
    pub fn substitute(&self, placeholder: &str, value: &str) -> Self {
        let mut resolved = self.clone();
        resolved.text = resolved.text.map(|t| t.replace(placeholder, value));
        for v in resolved.attributes.values_mut() {
            *v = v.replace(placeholder, value);
        }
        resolved
    }
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role.key())?;
        if let Some(text) = &self.text {
            let op = if self.text_contains { "~=" } else { "=" };
            write!(f, "[text{}{:?}]", op, text)?;
        }
        for (k, v) in &self.attributes {
            write!(f, "[{}={:?}]", k, v)?;
        }
        Ok(())
    }
}

/// 已定位元素的不透明句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

/// 点击方式，按升级顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// 模拟真实用户点击
    Normal,
    /// 跳过可见性/遮挡检查
    Forced,
    /// 直接以脚本方式触发，不模拟用户交互
    Programmatic,
}

impl Technique {
    pub const ESCALATION: [Technique; 3] =
        [Technique::Normal, Technique::Forced, Technique::Programmatic];
}

/// 当前页面身份
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageIdentity {
    /// 当前地址
    pub address: String,
    /// 地址中是否带有可改写的分页参数
    pub addressable: bool,
    /// 地址中解析出的页码
    pub page_number: Option<u32>,
    /// 是否仍在期望的域名内
    pub domain_ok: bool,
    /// 是否停留在登录页
    pub on_login_surface: bool,
}

impl PageIdentity {
    /// 会话是否仍然有效
    pub fn session_ok(&self) -> bool {
        self.domain_ok && !self.on_login_surface
    }
}

/// 文档端口
///
/// 所有方法都不抛错：失败以 `None` / `false` 表达，适配层自行记录细节。
#[async_trait]
pub trait DocumentPort: Send + Sync {
    /// 定位一个元素
    async fn locate(&self, descriptor: &ElementDescriptor) -> Option<ElementRef>;

    /// 以指定方式激活（点击）元素
    async fn activate(&self, element: ElementRef, technique: Technique) -> bool;

    /// 读取元素文本，失败时返回空串
    async fn read_text(&self, element: ElementRef) -> String;

    /// 导航到指定地址
    async fn navigate(&self, address: &str) -> bool;

    /// 等待页面稳定（网络与渲染静止），超时返回 false
    async fn wait_settled(&self, timeout: Duration) -> bool;

    /// 当前页面身份
    async fn current_identity(&self) -> PageIdentity;

    /// 释放会话资源
    async fn release(&self) {}

    /// 该适配层支持的点击升级序列
    fn techniques(&self) -> Vec<Technique> {
        Technique::ESCALATION.to_vec()
    }
}
