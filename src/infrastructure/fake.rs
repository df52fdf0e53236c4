//! 测试用模拟门户
//!
//! 一个带分页列表和"标记"按钮的内存页面，记录每一次调用供断言使用。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::document::{DocumentPort, ElementDescriptor, ElementRef, PageIdentity, Role, Technique};

pub const ACTION_TEXT: &str = "Flag";
pub const CONFIRM_TEXT: &str = "Continue";
pub const DISMISS_TEXT: &str = "Cancel";
pub const FLAGGED_TEXT: &str = "Flagged";

/// 调用记录
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub locates: usize,
    pub activations: Vec<(Role, Option<String>, Technique)>,
    pub navigations: Vec<String>,
    pub settles: usize,
    pub releases: usize,
}

impl Calls {
    pub fn count(&self, role: Role) -> usize {
        self.activations.iter().filter(|(r, _, _)| *r == role).count()
    }

    pub fn techniques_for(&self, text: &str) -> Vec<Technique> {
        self.activations
            .iter()
            .filter(|(_, t, _)| t.as_deref() == Some(text))
            .map(|(_, _, tech)| *tech)
            .collect()
    }

    /// 点击与导航的总次数
    pub fn navigation_actions(&self) -> usize {
        self.activations.len() + self.navigations.len()
    }
}

#[derive(Debug, Clone)]
pub struct PortalState {
    pub current_page: u32,
    pub total_pages: u32,
    pub pager_present: bool,
    pub numbered_links: bool,
    /// 当前页两侧可见的页码数量
    pub window: u32,
    pub expose_current: bool,
    pub has_last: bool,
    pub next_stride: u32,
    pub addressable: bool,
    pub domain_ok: bool,
    pub on_login: bool,
    pub settles: bool,
    /// 标记按钮只在这些点击方式下真正生效
    pub effective_techniques: Vec<Technique>,
    /// 标记按钮先弹出确认框
    pub dialog_enabled: bool,
    pub dialog_open: bool,
    pub flagged: bool,
    /// 第 N 次点击之后会话丢失
    pub lose_session_after: Option<usize>,
    pub calls: Calls,
}

pub struct FakePortal {
    state: Mutex<PortalState>,
    refs: Mutex<HashMap<u64, ElementDescriptor>>,
}

impl FakePortal {
    pub fn paged(current_page: u32, total_pages: u32) -> Self {
        Self {
            state: Mutex::new(PortalState {
                current_page,
                total_pages,
                pager_present: true,
                numbered_links: true,
                window: 2,
                expose_current: true,
                has_last: true,
                next_stride: 1,
                addressable: false,
                domain_ok: true,
                on_login: false,
                settles: true,
                effective_techniques: Technique::ESCALATION.to_vec(),
                dialog_enabled: false,
                dialog_open: false,
                flagged: false,
                lose_session_after: None,
                calls: Calls::default(),
            }),
            refs: Mutex::new(HashMap::new()),
        }
    }

    pub fn tweak(self, f: impl FnOnce(&mut PortalState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn set(&self, f: impl FnOnce(&mut PortalState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> PortalState {
        self.state.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn action_button() -> ElementDescriptor {
        ElementDescriptor::new(Role::Button).with_text(ACTION_TEXT)
    }

    pub fn confirm_button() -> ElementDescriptor {
        ElementDescriptor::new(Role::Button).with_text(CONFIRM_TEXT)
    }

    pub fn dismiss_button() -> ElementDescriptor {
        ElementDescriptor::new(Role::Button).with_text(DISMISS_TEXT)
    }

    pub fn dialog() -> ElementDescriptor {
        ElementDescriptor::new(Role::Dialog)
    }

    pub fn flagged_marker() -> ElementDescriptor {
        ElementDescriptor::new(Role::Text).with_text(FLAGGED_TEXT)
    }

    fn visible_pages(s: &PortalState) -> Vec<u32> {
        if !s.pager_present || !s.numbered_links {
            return Vec::new();
        }
        let lo = s.current_page.saturating_sub(s.window).max(1);
        let hi = (s.current_page + s.window).min(s.total_pages);
        (lo..=hi).collect()
    }

    fn present(s: &PortalState, d: &ElementDescriptor) -> bool {
        let text = d.text.as_deref();
        match d.role {
            Role::Pager => s.pager_present,
            Role::PageLink => text
                .and_then(|t| t.parse::<u32>().ok())
                .is_some_and(|n| Self::visible_pages(s).contains(&n)),
            Role::CurrentPage => s.pager_present && s.expose_current,
            Role::NextPage => s.pager_present && s.current_page < s.total_pages,
            Role::PreviousPage => s.pager_present && s.current_page > 1,
            Role::LastPage => s.pager_present && s.has_last,
            Role::Results => true,
            Role::Dialog => s.dialog_open,
            Role::Button => match text {
                Some(ACTION_TEXT) => !s.dialog_open,
                Some(CONFIRM_TEXT) | Some(DISMISS_TEXT) => s.dialog_open,
                _ => false,
            },
            Role::Text => text == Some(FLAGGED_TEXT) && s.flagged,
            _ => false,
        }
    }
}

#[async_trait]
impl DocumentPort for FakePortal {
    async fn locate(&self, descriptor: &ElementDescriptor) -> Option<ElementRef> {
        let present = {
            let mut s = self.state.lock().unwrap();
            s.calls.locates += 1;
            Self::present(&s, descriptor)
        };
        if !present {
            return None;
        }
        let mut refs = self.refs.lock().unwrap();
        let id = refs.len() as u64 + 1;
        refs.insert(id, descriptor.clone());
        Some(ElementRef(id))
    }

    async fn activate(&self, element: ElementRef, technique: Technique) -> bool {
        let Some(d) = self.refs.lock().unwrap().get(&element.0).cloned() else {
            return false;
        };
        let mut s = self.state.lock().unwrap();
        s.calls.activations.push((d.role, d.text.clone(), technique));

        match d.role {
            Role::PageLink => {
                if let Some(n) = d.text.as_deref().and_then(|t| t.parse().ok()) {
                    s.current_page = n;
                }
            }
            Role::NextPage => s.current_page = (s.current_page + s.next_stride).min(s.total_pages),
            Role::PreviousPage => s.current_page = s.current_page.saturating_sub(1).max(1),
            Role::LastPage => s.current_page = s.total_pages,
            Role::Button => match d.text.as_deref() {
                Some(ACTION_TEXT) if s.effective_techniques.contains(&technique) => {
                    if s.dialog_enabled {
                        s.dialog_open = true;
                    } else {
                        s.flagged = true;
                    }
                }
                Some(CONFIRM_TEXT) if s.dialog_open => {
                    s.dialog_open = false;
                    s.flagged = true;
                }
                Some(DISMISS_TEXT) => s.dialog_open = false,
                _ => {}
            },
            _ => {}
        }

        if let Some(limit) = s.lose_session_after {
            if s.calls.activations.len() >= limit {
                s.domain_ok = false;
            }
        }
        true
    }

    async fn read_text(&self, element: ElementRef) -> String {
        let Some(d) = self.refs.lock().unwrap().get(&element.0).cloned() else {
            return String::new();
        };
        let s = self.state.lock().unwrap();
        match d.role {
            Role::Pager => Self::visible_pages(&s)
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            Role::CurrentPage => s.current_page.to_string(),
            Role::LastPage => s.total_pages.to_string(),
            Role::Results => format!("rows-of-page-{}", s.current_page),
            _ => d.text.unwrap_or_default(),
        }
    }

    async fn navigate(&self, address: &str) -> bool {
        let mut s = self.state.lock().unwrap();
        s.calls.navigations.push(address.to_string());
        if let Some(page) = crate::navigation::parse_page_param(address, "page") {
            s.current_page = page.min(s.total_pages.max(1));
        }
        true
    }

    async fn wait_settled(&self, _timeout: Duration) -> bool {
        let mut s = self.state.lock().unwrap();
        s.calls.settles += 1;
        s.settles
    }

    async fn current_identity(&self) -> PageIdentity {
        let s = self.state.lock().unwrap();
        let address = if s.addressable {
            format!("https://portal.test/cases?page={}", s.current_page)
        } else {
            "https://portal.test/cases".to_string()
        };
        PageIdentity {
            address,
            addressable: s.addressable,
            page_number: s.addressable.then_some(s.current_page),
            domain_ok: s.domain_ok,
            on_login_surface: s.on_login,
        }
    }

    async fn release(&self) {
        self.state.lock().unwrap().calls.releases += 1;
        self.refs.lock().unwrap().clear();
    }
}
