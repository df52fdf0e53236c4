//! 浏览器文档适配器 - 基础设施层
//!
//! 把 `DocumentPort` 翻译成对 `JsExecutor` 的 JS 调用。
//! 描述符按角色映射为 CSS 选择器，再按可见文本和属性过滤；
//! 命中的元素打上 `data-cpf-ref` 标记，返回的 `ElementRef` 就是这个标记值。

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::infrastructure::{
    DocumentPort, ElementDescriptor, ElementRef, JsExecutor, PageIdentity, Role, Technique,
};
use crate::navigation::parse_page_param;

const REF_ATTR: &str = "data-cpf-ref";
const SETTLE_POLL: Duration = Duration::from_millis(150);

/// 角色的默认 CSS 选择器，可被配置中的 `[selectors]` 覆盖
fn default_selector(role: Role) -> &'static str {
    match role {
        Role::Any => "body *",
        Role::Link => "a[href], [role=link]",
        Role::Button => {
            "button, input[type=button], input[type=submit], [role=button], a.btn, a.button"
        }
        Role::Input => "input, textarea, select",
        Role::Text => "span, div, p, td, th, label, strong, em, b, h1, h2, h3, h4, li",
        Role::Row => "tr, [role=row], li",
        Role::Dialog => {
            "[role=dialog], [role=alertdialog], dialog[open], .modal.show, .modal.in, .ui-dialog"
        }
        Role::Pager => ".pagination, .pager, nav[aria-label*=pag i]",
        Role::PageLink => ".pagination a, .pagination button, .pager a, .pager button",
        Role::CurrentPage => {
            ".pagination .active, .pagination [aria-current=page], .pager .current"
        }
        Role::NextPage => {
            ".pagination .next a, .pagination a[rel=next], .pagination [aria-label*=next i], .pager .next"
        }
        Role::PreviousPage => {
            ".pagination .prev a, .pagination .previous a, .pagination a[rel=prev], .pagination [aria-label*=prev i], .pager .prev"
        }
        Role::LastPage => ".pagination .last a, .pagination [aria-label*=last i], .pager .last",
        Role::Results => "table tbody, [role=grid], .results",
    }
}

#[derive(Debug, Deserialize)]
struct SettleProbe {
    ready: bool,
    resources: u64,
    busy: bool,
}

/// 基于 chromiumoxide 的文档适配器
pub struct CdpDocument {
    executor: JsExecutor,
    selectors: BTreeMap<String, String>,
    busy_indicator: Option<String>,
    expected_domain: String,
    login_markers: Vec<String>,
    page_param: String,
    next_ref: AtomicU64,
    issued: Mutex<HashSet<u64>>,
}

impl CdpDocument {
    pub fn new(executor: JsExecutor, config: &Config) -> Self {
        Self {
            executor,
            selectors: config.selectors.clone(),
            busy_indicator: config.busy_indicator.clone(),
            expected_domain: config.expected_domain.clone(),
            login_markers: config
                .login_markers
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            page_param: config.navigation.page_param.clone(),
            next_ref: AtomicU64::new(1),
            issued: Mutex::new(HashSet::new()),
        }
    }

    pub fn executor(&self) -> &JsExecutor {
        &self.executor
    }

    fn selector_for(&self, role: Role) -> &str {
        self.selectors
            .get(role.key())
            .map(String::as_str)
            .unwrap_or_else(|| default_selector(role))
    }

    /// release 之后旧句柄一律失效
    fn is_issued(&self, element: ElementRef) -> bool {
        self.issued
            .lock()
            .map(|issued| issued.contains(&element.0))
            .unwrap_or(false)
    }

    fn ref_selector(element: ElementRef) -> String {
        format!("[{}=\"{}\"]", REF_ATTR, element.0)
    }

    /// 对已标记的元素执行一段脚本，`el` 为元素变量；元素不存在时返回 null
    async fn eval_on(&self, element: ElementRef, body: &str) -> Option<serde_json::Value> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return null;
                {body}
            }})()"#,
            selector = json!(Self::ref_selector(element)),
            body = body,
        );
        match self.executor.eval(js).await {
            Ok(serde_json::Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                debug!("元素脚本执行失败 ({:?}): {}", element, e);
                None
            }
        }
    }

    async fn click_normal(&self, element: ElementRef) -> bool {
        match self
            .executor
            .page()
            .find_element(Self::ref_selector(element))
            .await
        {
            Ok(el) => match el.click().await {
                Ok(_) => true,
                Err(e) => {
                    debug!("普通点击失败: {}", e);
                    false
                }
            },
            Err(e) => {
                debug!("普通点击找不到元素: {}", e);
                false
            }
        }
    }

    async fn click_forced(&self, element: ElementRef) -> bool {
        self.eval_on(
            element,
            r#"
                const r = el.getBoundingClientRect();
                const opts = { bubbles: true, cancelable: true, view: window,
                               clientX: r.left + r.width / 2, clientY: r.top + r.height / 2 };
                for (const type of ['pointerdown', 'mousedown', 'pointerup', 'mouseup', 'click']) {
                    const Ctor = type.startsWith('pointer') && window.PointerEvent ? PointerEvent : MouseEvent;
                    el.dispatchEvent(new Ctor(type, opts));
                }
                return true;
            "#,
        )
        .await
        .is_some()
    }

    async fn click_programmatic(&self, element: ElementRef) -> bool {
        self.eval_on(
            element,
            r#"
                const isSubmit = (el.tagName === 'BUTTON' || el.tagName === 'INPUT')
                    && (el.type || '').toLowerCase() === 'submit';
                if (isSubmit && el.form && el.form.requestSubmit) {
                    el.form.requestSubmit(el);
                } else if (typeof el.click === 'function') {
                    el.click();
                } else {
                    return false;
                }
                return true;
            "#,
        )
        .await
        .is_some_and(|v| v.as_bool().unwrap_or(false))
    }

    async fn probe_settle(&self) -> Option<SettleProbe> {
        let js = format!(
            r#"(() => {{
                const busySel = {busy};
                let busy = false;
                if (busySel) {{
                    try {{
                        busy = Array.from(document.querySelectorAll(busySel))
                            .some(el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length));
                    }} catch (e) {{ busy = false; }}
                }}
                return {{
                    ready: document.readyState === 'complete',
                    resources: performance.getEntriesByType('resource').length,
                    busy,
                }};
            }})()"#,
            busy = json!(self.busy_indicator),
        );
        match self.executor.eval_as::<SettleProbe>(js).await {
            Ok(probe) => Some(probe),
            Err(e) => {
                debug!("页面稳定性检测失败: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl DocumentPort for CdpDocument {
    async fn locate(&self, descriptor: &ElementDescriptor) -> Option<ElementRef> {
        let id = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let js = format!(
            r#"(() => {{
                const sel = {selector};
                const text = {text};
                const contains = {contains};
                const attrs = {attrs};
                const norm = s => (s || '').replace(/\s+/g, ' ').trim();
                const visible = el => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
                let candidates;
                try {{ candidates = Array.from(document.querySelectorAll(sel)); }} catch (e) {{ return false; }}
                const hit = candidates.find(el => {{
                    if (!visible(el)) return false;
                    if (text !== null) {{
                        const t = norm(el.innerText || el.value || el.textContent);
                        if (contains ? !t.includes(text) : t !== text) return false;
                    }}
                    for (const [k, v] of Object.entries(attrs)) {{
                        if (el.getAttribute(k) !== v) return false;
                    }}
                    return true;
                }});
                if (!hit) return false;
                hit.setAttribute({attr}, String({id}));
                return true;
            }})()"#,
            selector = json!(self.selector_for(descriptor.role)),
            text = json!(descriptor.text.as_deref().map(str::trim)),
            contains = descriptor.text_contains,
            attrs = json!(descriptor.attributes),
            attr = json!(REF_ATTR),
            id = id,
        );

        match self.executor.eval_as::<bool>(js).await {
            Ok(true) => {
                if let Ok(mut issued) = self.issued.lock() {
                    issued.insert(id);
                }
                Some(ElementRef(id))
            }
            Ok(false) => None,
            Err(e) => {
                debug!("定位元素失败 {}: {}", descriptor, e);
                None
            }
        }
    }

    async fn activate(&self, element: ElementRef, technique: Technique) -> bool {
        if !self.is_issued(element) {
            debug!("元素句柄已失效: {:?}", element);
            return false;
        }
        debug!("点击元素 {:?} ({:?})", element, technique);
        match technique {
            Technique::Normal => self.click_normal(element).await,
            Technique::Forced => self.click_forced(element).await,
            Technique::Programmatic => self.click_programmatic(element).await,
        }
    }

    async fn read_text(&self, element: ElementRef) -> String {
        self.eval_on(
            element,
            "return (el.innerText || el.value || el.textContent || '').replace(/\\s+/g, ' ').trim();",
        )
        .await
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
    }

    async fn navigate(&self, address: &str) -> bool {
        match self.executor.goto(address).await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ 导航失败: {}", e);
                false
            }
        }
    }

    async fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut last_resources = None;
        loop {
            if let Some(probe) = self.probe_settle().await {
                let stable = last_resources == Some(probe.resources);
                if probe.ready && !probe.busy && stable {
                    return true;
                }
                last_resources = Some(probe.resources);
            }
            if Instant::now() >= deadline {
                debug!("页面未在 {:?} 内稳定", timeout);
                return false;
            }
            sleep(SETTLE_POLL).await;
        }
    }

    async fn current_identity(&self) -> PageIdentity {
        let address = match self.executor.url().await {
            Ok(Some(url)) => url,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("⚠️ 无法读取页面地址: {}", e);
                String::new()
            }
        };
        identify(
            &address,
            &self.expected_domain,
            &self.login_markers,
            &self.page_param,
        )
    }

    async fn release(&self) {
        if let Ok(mut issued) = self.issued.lock() {
            issued.clear();
        }
        let js = format!(
            "document.querySelectorAll('[{attr}]').forEach(el => el.removeAttribute('{attr}')); true",
            attr = REF_ATTR
        );
        if let Err(e) = self.executor.eval(js).await {
            debug!("清理元素标记失败: {}", e);
        }
    }
}

/// 从地址推断页面身份
fn identify(
    address: &str,
    expected_domain: &str,
    login_markers: &[String],
    page_param: &str,
) -> PageIdentity {
    let lower = address.to_ascii_lowercase();
    let host = host_of(&lower);
    let on_login_surface = login_markers.iter().any(|m| lower.contains(m.as_str()));
    let domain_ok = !host.is_empty()
        && host.contains(&expected_domain.to_ascii_lowercase())
        && !on_login_surface;
    let page_number = parse_page_param(address, page_param);

    PageIdentity {
        address: address.to_string(),
        addressable: page_number.is_some(),
        page_number,
        domain_ok,
        on_login_surface,
    }
}

fn host_of(address: &str) -> &str {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().unwrap_or("")
}
