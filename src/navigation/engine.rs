//! 翻页策略引擎 - 能力层
//!
//! 在没有直接寻址能力的远端列表中到达指定页码。
//!
//! 策略按固定顺序尝试，第一个声称成功的策略胜出，随后做一次到达校验；
//! 校验失败直接返回 `NotReached`，不会再回落到后续策略。重试由调用方负责。

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::NavigationSettings;
use crate::infrastructure::{DocumentPort, PageIdentity, Technique};
use crate::navigation::strategy::{
    NavigationTarget, NotReached, PagerLayout, Reached, StrategyKind,
};
use crate::workflow::signal::StopProbe;

/// 单次 reach 调用中的位置游标
#[derive(Debug, Clone, Copy)]
struct Cursor {
    page: u32,
    actions: u32,
}

type StepResult = Result<bool, NotReached>;

/// 翻页策略引擎
#[derive(Debug, Clone)]
pub struct NavigationEngine {
    layout: PagerLayout,
    jump_threshold: u32,
    settle_timeout: Duration,
    page_param: String,
    stop: StopProbe,
}

impl NavigationEngine {
    pub fn new(settings: &NavigationSettings, layout: PagerLayout) -> Self {
        Self {
            layout,
            jump_threshold: settings.jump_threshold,
            settle_timeout: settings.settle_timeout(),
            page_param: settings.page_param.clone(),
            stop: StopProbe::detached(),
        }
    }

    /// 绑定停止信号，逐页行走时每一步都会检查
    pub fn with_stop(mut self, stop: StopProbe) -> Self {
        self.stop = stop;
        self
    }

    pub fn layout(&self) -> &PagerLayout {
        &self.layout
    }

    /// 到达目标页
    pub async fn reach(
        &self,
        doc: &dyn DocumentPort,
        target: NavigationTarget,
    ) -> Result<Reached, NotReached> {
        let page = target.page_number;
        if page == 0 {
            return Err(NotReached::InvalidTarget(page));
        }

        let identity = self.ensure_session(doc).await?;
        let observed = self.observe_page(doc, &identity).await;
        if observed == Some(page) {
            debug!("已在第 {} 页，无需翻页", page);
            return Ok(Reached {
                page,
                strategy: None,
                tried: Vec::new(),
                actions: 0,
            });
        }

        // 读不到页码时，用内容指纹判断是否真的翻过去了
        let fingerprint_before = match observed {
            Some(_) => None,
            None => self.fingerprint(doc).await,
        };

        let mut cursor = Cursor {
            page: observed.unwrap_or(1),
            actions: 0,
        };
        let mut tried = Vec::new();
        let mut claimed = None;

        for kind in StrategyKind::CHAIN {
            if self.stop.is_stopped() {
                return Err(NotReached::Stopped);
            }

            let attempt = match kind {
                StrategyKind::DirectLocate => Some(self.direct_locate(doc, page, &mut cursor).await),
                StrategyKind::DirectAddress => {
                    let identity = self.ensure_session(doc).await?;
                    if identity.addressable {
                        Some(self.direct_address(doc, &identity, page, &mut cursor).await)
                    } else {
                        debug!("地址中没有分页参数，跳过 [{}]", kind);
                        None
                    }
                }
                StrategyKind::JumpAndWalk => {
                    if target.distance_from(cursor.page) > self.jump_threshold {
                        Some(self.jump_and_walk(doc, page, &mut cursor).await)
                    } else {
                        None
                    }
                }
                StrategyKind::ReverseFromEnd => match self.known_total(doc, &target).await {
                    Some(total) if prefers_reverse(total, page) => {
                        Some(self.reverse_from_end(doc, total, page, &mut cursor).await)
                    }
                    _ => None,
                },
                StrategyKind::IncrementalWalk => Some(self.walk(doc, page, &mut cursor).await),
            };

            let Some(result) = attempt else {
                continue;
            };
            tried.push(kind);

            if result? {
                info!(
                    "🧭 策略 [{}] 到达第 {} 页 (动作 {} 次)",
                    kind, page, cursor.actions
                );
                claimed = Some(kind);
                break;
            }

            warn!("策略 [{}] 未能到达第 {} 页", kind, page);
            // 失败的策略可能已经移动了位置
            let identity = self.ensure_session(doc).await?;
            if let Some(p) = self.observe_page(doc, &identity).await {
                cursor.page = p;
            }
        }

        let Some(strategy) = claimed else {
            return Err(NotReached::Exhausted {
                target: page,
                tried,
            });
        };

        self.confirm_arrival(doc, strategy, page, cursor, tried, fingerprint_before)
            .await
    }

    /// 到达校验
    async fn confirm_arrival(
        &self,
        doc: &dyn DocumentPort,
        strategy: StrategyKind,
        page: u32,
        cursor: Cursor,
        tried: Vec<StrategyKind>,
        fingerprint_before: Option<String>,
    ) -> Result<Reached, NotReached> {
        let identity = self.ensure_session(doc).await?;
        let reached = Reached {
            page,
            strategy: Some(strategy),
            tried,
            actions: cursor.actions,
        };

        match self.observe_page(doc, &identity).await {
            Some(p) if p == page => Ok(reached),
            Some(p) => Err(NotReached::Mismatch {
                target: page,
                strategy,
                observed: format!("第 {} 页", p),
            }),
            None => {
                let after = self.fingerprint(doc).await;
                match (fingerprint_before, after) {
                    (Some(before), Some(after)) if before == after => Err(NotReached::Mismatch {
                        target: page,
                        strategy,
                        observed: "内容指纹未变化".to_string(),
                    }),
                    (_, None) => {
                        warn!("页码与内容指纹均不可读，按本地计数认定到达第 {} 页", page);
                        Ok(reached)
                    }
                    _ => Ok(reached),
                }
            }
        }
    }

    // ========== 策略实现 ==========

    async fn direct_locate(&self, doc: &dyn DocumentPort, page: u32, cursor: &mut Cursor) -> StepResult {
        self.ensure_session(doc).await?;
        let Some(link) = doc.locate(&self.layout.page_link(page)).await else {
            debug!("分页器中没有第 {} 页的链接", page);
            return Ok(false);
        };
        if !doc.activate(link, self.technique(doc)).await {
            return Ok(false);
        }
        cursor.actions += 1;
        if !doc.wait_settled(self.settle_timeout).await {
            warn!("点击第 {} 页后页面未稳定", page);
            return Ok(false);
        }
        cursor.page = page;
        Ok(true)
    }

    async fn direct_address(
        &self,
        doc: &dyn DocumentPort,
        identity: &PageIdentity,
        page: u32,
        cursor: &mut Cursor,
    ) -> StepResult {
        let Some(address) = rewrite_page_param(&identity.address, &self.page_param, page) else {
            return Ok(false);
        };
        debug!("改写分页参数: {}", address);
        if !doc.navigate(&address).await {
            return Ok(false);
        }
        cursor.actions += 1;
        if !doc.wait_settled(self.settle_timeout).await {
            return Ok(false);
        }
        cursor.page = page;
        Ok(true)
    }

    async fn jump_and_walk(&self, doc: &dyn DocumentPort, page: u32, cursor: &mut Cursor) -> StepResult {
        let visible = self.visible_pages(doc).await;
        let Some(anchor) = visible.into_iter().min_by_key(|p| p.abs_diff(page)) else {
            debug!("分页器中没有可见页码");
            return Ok(false);
        };
        if anchor.abs_diff(page) >= page.abs_diff(cursor.page) {
            debug!("最近的可见页码 {} 并不比当前页更近", anchor);
            return Ok(false);
        }

        debug!("先跳到第 {} 页，再逐页走到第 {} 页", anchor, page);
        if !self.direct_locate(doc, anchor, cursor).await? {
            return Ok(false);
        }
        self.walk(doc, page, cursor).await
    }

    async fn reverse_from_end(
        &self,
        doc: &dyn DocumentPort,
        total: u32,
        page: u32,
        cursor: &mut Cursor,
    ) -> StepResult {
        self.ensure_session(doc).await?;
        let Some(last) = doc.locate(&self.layout.last).await else {
            debug!("分页器中没有末页控件");
            return Ok(false);
        };
        if !doc.activate(last, self.technique(doc)).await {
            return Ok(false);
        }
        cursor.actions += 1;
        if !doc.wait_settled(self.settle_timeout).await {
            return Ok(false);
        }
        cursor.page = total;
        self.walk(doc, page, cursor).await
    }

    /// 逐页行走；任何一步找不到控件都直接失败，不汇报部分进度
    async fn walk(&self, doc: &dyn DocumentPort, page: u32, cursor: &mut Cursor) -> StepResult {
        let technique = self.technique(doc);
        while cursor.page != page {
            if self.stop.is_stopped() {
                return Err(NotReached::Stopped);
            }
            self.ensure_session(doc).await?;

            let forward = page > cursor.page;
            let control = if forward {
                &self.layout.next
            } else {
                &self.layout.previous
            };
            let Some(element) = doc.locate(control).await else {
                warn!(
                    "第 {} 页找不到{}控件",
                    cursor.page,
                    if forward { "下一页" } else { "上一页" }
                );
                return Ok(false);
            };
            if !doc.activate(element, technique).await {
                return Ok(false);
            }
            cursor.actions += 1;
            if !doc.wait_settled(self.settle_timeout).await {
                return Ok(false);
            }
            cursor.page = if forward { cursor.page + 1 } else { cursor.page - 1 };
        }
        Ok(true)
    }

    // ========== 观察辅助 ==========

    async fn ensure_session(&self, doc: &dyn DocumentPort) -> Result<PageIdentity, NotReached> {
        let identity = doc.current_identity().await;
        if identity.session_ok() {
            Ok(identity)
        } else {
            Err(NotReached::SessionLost {
                address: identity.address,
            })
        }
    }

    /// 当前页码：优先地址，其次分页器中的当前页标记
    async fn observe_page(&self, doc: &dyn DocumentPort, identity: &PageIdentity) -> Option<u32> {
        if let Some(page) = identity.page_number {
            return Some(page);
        }
        let marker = doc.locate(&self.layout.current).await?;
        first_number(&doc.read_text(marker).await)
    }

    async fn fingerprint(&self, doc: &dyn DocumentPort) -> Option<String> {
        let results = doc.locate(&self.layout.results).await?;
        let text = doc.read_text(results).await;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    async fn visible_pages(&self, doc: &dyn DocumentPort) -> Vec<u32> {
        let Some(pager) = doc.locate(&self.layout.container).await else {
            return Vec::new();
        };
        all_numbers(&doc.read_text(pager).await)
    }

    async fn known_total(&self, doc: &dyn DocumentPort, target: &NavigationTarget) -> Option<u32> {
        if target.total_pages.is_some() {
            return target.total_pages;
        }
        let last = doc.locate(&self.layout.last).await?;
        first_number(&doc.read_text(last).await)
    }

    fn technique(&self, doc: &dyn DocumentPort) -> Technique {
        doc.techniques().first().copied().unwrap_or(Technique::Normal)
    }
}

/// 目标离末页严格比离首页近
fn prefers_reverse(total: u32, page: u32) -> bool {
    page <= total && total - page < page.saturating_sub(1)
}

/// 把地址中的分页参数改写为指定页码；地址中没有该参数时返回 None
pub fn rewrite_page_param(address: &str, param: &str, page: u32) -> Option<String> {
    let re = Regex::new(&format!(r"([?&#]{}=)\d+", regex::escape(param))).ok()?;
    if !re.is_match(address) {
        return None;
    }
    Some(re.replacen(address, 1, format!("${{1}}{}", page)).into_owned())
}

/// 从地址中解析分页参数
pub fn parse_page_param(address: &str, param: &str) -> Option<u32> {
    let re = Regex::new(&format!(r"[?&#]{}=(\d+)", regex::escape(param))).ok()?;
    re.captures(address)?.get(1)?.as_str().parse().ok()
}

fn first_number(text: &str) -> Option<u32> {
    all_numbers(text).into_iter().next()
}

fn all_numbers(text: &str) -> Vec<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse::<u32>().ok())
        .filter(|n| *n >= 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::fake::FakePortal;
    use crate::infrastructure::Role;

    fn engine() -> NavigationEngine {
        let settings = NavigationSettings {
            settle_timeout_ms: 10,
            ..Default::default()
        };
        NavigationEngine::new(&settings, PagerLayout::default())
    }

    #[tokio::test]
    async fn reach_on_current_page_is_idempotent() {
        let portal = FakePortal::paged(4, 10);
        let engine = engine();

        for _ in 0..2 {
            let reached = engine.reach(&portal, NavigationTarget::page(4)).await.unwrap();
            assert_eq!(reached.strategy, None);
            assert_eq!(reached.actions, 0);
        }
        assert_eq!(portal.calls().navigation_actions(), 0);
    }

    #[tokio::test]
    async fn visible_page_uses_direct_locate() {
        let portal = FakePortal::paged(1, 20);
        let reached = engine().reach(&portal, NavigationTarget::page(3)).await.unwrap();

        assert_eq!(reached.strategy, Some(StrategyKind::DirectLocate));
        assert_eq!(reached.tried, vec![StrategyKind::DirectLocate]);
        assert_eq!(portal.state().current_page, 3);
        assert_eq!(portal.calls().count(Role::LastPage), 0);
    }

    #[tokio::test]
    async fn short_distance_never_jumps_or_reverses() {
        let portal = FakePortal::paged(1, 20).tweak(|s| s.numbered_links = false);
        let reached = engine()
            .reach(&portal, NavigationTarget::page(4).with_total(20))
            .await
            .unwrap();

        assert_eq!(reached.strategy, Some(StrategyKind::IncrementalWalk));
        assert!(!reached.tried.contains(&StrategyKind::JumpAndWalk));
        assert!(!reached.tried.contains(&StrategyKind::ReverseFromEnd));
        let calls = portal.calls();
        assert_eq!(calls.count(Role::NextPage), 3);
        assert_eq!(calls.count(Role::LastPage), 0);
        assert_eq!(calls.count(Role::PageLink), 0);
    }

    #[tokio::test]
    async fn addressable_listing_rewrites_page_param() {
        let portal = FakePortal::paged(1, 40).tweak(|s| {
            s.numbered_links = false;
            s.addressable = true;
        });
        let reached = engine().reach(&portal, NavigationTarget::page(9)).await.unwrap();

        assert_eq!(reached.strategy, Some(StrategyKind::DirectAddress));
        let calls = portal.calls();
        assert_eq!(calls.navigations.len(), 1);
        assert!(calls.navigations[0].ends_with("page=9"));
        assert_eq!(calls.count(Role::NextPage), 0);
    }

    #[tokio::test]
    async fn server_paginated_listing_skips_direct_address() {
        let portal = FakePortal::paged(1, 10).tweak(|s| s.numbered_links = false);
        let reached = engine().reach(&portal, NavigationTarget::page(3)).await.unwrap();

        assert!(!reached.tried.contains(&StrategyKind::DirectAddress));
        assert!(portal.calls().navigations.is_empty());
    }

    #[tokio::test]
    async fn long_distance_jumps_to_nearest_visible_anchor() {
        let portal = FakePortal::paged(1, 50);
        let reached = engine().reach(&portal, NavigationTarget::page(30)).await.unwrap();

        assert_eq!(reached.strategy, Some(StrategyKind::JumpAndWalk));
        let calls = portal.calls();
        // 可见页码 1..=3，跳到 3 后再走 27 步
        assert_eq!(calls.count(Role::PageLink), 1);
        assert_eq!(calls.count(Role::NextPage), 27);
        assert_eq!(portal.state().current_page, 30);
    }

    #[tokio::test]
    async fn target_near_end_walks_back_from_last_page() {
        let portal = FakePortal::paged(1, 20).tweak(|s| s.numbered_links = false);
        let reached = engine().reach(&portal, NavigationTarget::page(18)).await.unwrap();

        assert_eq!(reached.strategy, Some(StrategyKind::ReverseFromEnd));
        assert!(!reached.tried.contains(&StrategyKind::IncrementalWalk));
        let calls = portal.calls();
        assert_eq!(calls.count(Role::LastPage), 1);
        assert_eq!(calls.count(Role::PreviousPage), 2);
        assert_eq!(calls.count(Role::NextPage), 0);
    }

    #[tokio::test]
    async fn missing_pager_is_not_reached() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.pager_present = false);
        let err = engine().reach(&portal, NavigationTarget::page(2)).await.unwrap_err();

        assert!(matches!(err, NotReached::Exhausted { target: 2, .. }));
    }

    #[tokio::test]
    async fn arrival_mismatch_does_not_fall_through() {
        // 有缺陷的分页器：每次"下一页"跳两页
        let portal = FakePortal::paged(1, 20).tweak(|s| {
            s.numbered_links = false;
            s.next_stride = 2;
        });
        let err = engine().reach(&portal, NavigationTarget::page(4)).await.unwrap_err();

        match err {
            NotReached::Mismatch { strategy, .. } => {
                assert_eq!(strategy, StrategyKind::IncrementalWalk)
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(portal.calls().count(Role::NextPage), 3);
    }

    #[tokio::test]
    async fn session_loss_is_reported_immediately() {
        let portal = FakePortal::paged(1, 20).tweak(|s| s.domain_ok = false);
        let err = engine().reach(&portal, NavigationTarget::page(5)).await.unwrap_err();

        assert!(err.is_session_lost());
        assert_eq!(portal.calls().navigation_actions(), 0);
    }

    #[tokio::test]
    async fn page_zero_is_rejected() {
        let portal = FakePortal::paged(1, 20);
        let err = engine().reach(&portal, NavigationTarget::page(0)).await.unwrap_err();
        assert_eq!(err, NotReached::InvalidTarget(0));
    }

    #[test]
    fn rewrites_only_existing_param() {
        assert_eq!(
            rewrite_page_param("https://p.test/cases?sort=asc&page=2", "page", 7).as_deref(),
            Some("https://p.test/cases?sort=asc&page=7")
        );
        assert_eq!(rewrite_page_param("https://p.test/cases", "page", 7), None);
        assert_eq!(parse_page_param("https://p.test/cases?page=12", "page"), Some(12));
    }

    #[test]
    fn reverse_preference_matches_distance_rule() {
        assert!(prefers_reverse(20, 18));
        assert!(!prefers_reverse(20, 10));
        assert!(!prefers_reverse(20, 1));
        assert!(!prefers_reverse(5, 9));
    }
}
