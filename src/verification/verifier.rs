//! 操作确认循环 - 能力层
//!
//! 点击本身的返回值不可信，只有 `verify` 返回 true 才算生效。
//! 每次失败后按 `attempt * base_delay` 线性退避，并升级点击方式
//! （普通 → 强制 → 脚本）。

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::VerificationSettings;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{DocumentPort, ElementDescriptor, Technique};
use crate::workflow::signal::StopProbe;

/// 单次调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub attempted: bool,
    pub confirmed: bool,
    pub attempts_used: u32,
    /// 被停止信号打断
    pub stopped: bool,
}

impl ActionOutcome {
    fn confirmed(attempts_used: u32) -> Self {
        Self {
            attempted: true,
            confirmed: true,
            attempts_used,
            stopped: false,
        }
    }

    fn unconfirmed(attempts_used: u32) -> Self {
        Self {
            attempted: attempts_used > 0,
            confirmed: false,
            attempts_used,
            stopped: false,
        }
    }

    fn interrupted(attempts_used: u32) -> Self {
        Self {
            stopped: true,
            ..Self::unconfirmed(attempts_used)
        }
    }
}

/// 单次动作的自报结果（仅用于日志，不作为成功依据）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Performed,
    /// 元素不存在或点击被拒绝
    Missed,
}

/// 中间确认框
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationSurface {
    /// 确认框本身
    pub surface: ElementDescriptor,
    /// 确认框中的"继续"控件
    pub control: ElementDescriptor,
    /// 用于关闭残留确认框的控件
    #[serde(default)]
    pub dismiss: Option<ElementDescriptor>,
}

/// 操作确认循环
#[derive(Debug, Clone)]
pub struct ActionVerifier {
    max_attempts: u32,
    base_delay: Duration,
    modal_timeout: Duration,
    settle_timeout: Duration,
    poll_interval: Duration,
    techniques: Option<Vec<Technique>>,
    stop: StopProbe,
}

impl ActionVerifier {
    pub fn new(settings: &VerificationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            modal_timeout: settings.modal_timeout(),
            settle_timeout: settings.settle_timeout(),
            poll_interval: settings.poll_interval(),
            techniques: None,
            stop: StopProbe::detached(),
        }
    }

    pub fn with_stop(mut self, stop: StopProbe) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 覆盖点击升级序列；不设置时使用文档端口自带的序列
    pub fn with_techniques(mut self, techniques: Vec<Technique>) -> Self {
        self.techniques = (!techniques.is_empty()).then_some(techniques);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    /// 执行动作并确认生效
    ///
    /// # 参数
    /// - `action`: 以给定点击方式执行一次动作
    /// - `verify`: 判断远端状态是否已改变
    ///
    /// # 返回
    /// 会话丢失时返回 `AppError::SessionLost`，其余情况都以 `ActionOutcome` 表达
    pub async fn perform_and_verify<A, AF, V, VF>(
        &self,
        doc: &dyn DocumentPort,
        mut action: A,
        mut verify: V,
    ) -> AppResult<ActionOutcome>
    where
        A: FnMut(Technique) -> AF,
        AF: Future<Output = AttemptOutcome>,
        V: FnMut() -> VF,
        VF: Future<Output = bool>,
    {
        let techniques = self.techniques_for(doc);

        for attempt in 1..=self.max_attempts {
            if self.stop.is_stopped() {
                return Ok(ActionOutcome::interrupted(attempt - 1));
            }
            ensure_session(doc).await?;

            let technique = technique_at(&techniques, attempt);
            let reported = action(technique).await;
            debug!("第 {} 次尝试 ({:?}) 自报结果: {:?}", attempt, technique, reported);

            if !doc.wait_settled(self.settle_timeout).await {
                debug!("页面未在 {:?} 内稳定，继续校验", self.settle_timeout);
            }

            if verify().await {
                info!("✓ 操作已确认 (第 {} 次尝试, {:?})", attempt, technique);
                return Ok(ActionOutcome::confirmed(attempt));
            }

            warn!(
                "第 {}/{} 次尝试 ({:?}) 未确认生效",
                attempt, self.max_attempts, technique
            );

            if attempt < self.max_attempts && !self.stop.sleep(self.base_delay * attempt).await {
                return Ok(ActionOutcome::interrupted(attempt));
            }
        }

        Ok(ActionOutcome::unconfirmed(self.max_attempts))
    }

    /// 点击某个元素并确认生效
    pub async fn click_and_verify<V, VF>(
        &self,
        doc: &dyn DocumentPort,
        target: &ElementDescriptor,
        verify: V,
    ) -> AppResult<ActionOutcome>
    where
        V: FnMut() -> VF,
        VF: Future<Output = bool>,
    {
        self.perform_and_verify(doc, |technique| click(doc, target, technique), verify)
            .await
    }

    /// 带中间确认框的动作
    ///
    /// 主动作 → 等待确认框出现 → 点击确认（同样升级点击方式）→ 等待确认框消失 → 校验。
    /// 确认框在超时内没有出现属于硬失败：关闭残留确认框后立即返回未确认。
    pub async fn perform_with_confirmation<V, VF>(
        &self,
        doc: &dyn DocumentPort,
        primary: &ElementDescriptor,
        confirmation: &ConfirmationSurface,
        mut verify: V,
    ) -> AppResult<ActionOutcome>
    where
        V: FnMut() -> VF,
        VF: Future<Output = bool>,
    {
        let techniques = self.techniques_for(doc);

        for attempt in 1..=self.max_attempts {
            if self.stop.is_stopped() {
                return Ok(ActionOutcome::interrupted(attempt - 1));
            }
            ensure_session(doc).await?;

            let technique = technique_at(&techniques, attempt);
            let reported = click(doc, primary, technique).await;
            debug!("主动作第 {} 次 ({:?}): {:?}", attempt, technique, reported);

            if !self.wait_presence(doc, &confirmation.surface, true).await {
                warn!(
                    "确认框未在 {:?} 内出现: {}",
                    self.modal_timeout, confirmation.surface
                );
                self.dismiss_stray(doc, confirmation).await;
                return Ok(ActionOutcome {
                    stopped: self.stop.is_stopped(),
                    ..ActionOutcome::unconfirmed(attempt)
                });
            }

            if !self.acknowledge(doc, confirmation, &techniques).await {
                warn!("确认控件点击后确认框仍未关闭: {}", confirmation.control);
                self.dismiss_stray(doc, confirmation).await;
            }

            if !doc.wait_settled(self.settle_timeout).await {
                debug!("确认后页面未稳定，继续校验");
            }

            if verify().await {
                info!("✓ 确认框操作已生效 (第 {} 次尝试)", attempt);
                return Ok(ActionOutcome::confirmed(attempt));
            }

            warn!(
                "第 {}/{} 次确认框操作未生效",
                attempt, self.max_attempts
            );
            if attempt < self.max_attempts && !self.stop.sleep(self.base_delay * attempt).await {
                return Ok(ActionOutcome::interrupted(attempt));
            }
        }

        Ok(ActionOutcome::unconfirmed(self.max_attempts))
    }

    /// 依次升级点击方式，直到确认框消失
    async fn acknowledge(
        &self,
        doc: &dyn DocumentPort,
        confirmation: &ConfirmationSurface,
        techniques: &[Technique],
    ) -> bool {
        for technique in techniques {
            match doc.locate(&confirmation.control).await {
                Some(control) => {
                    doc.activate(control, *technique).await;
                }
                None if doc.locate(&confirmation.surface).await.is_none() => return true,
                None => debug!("确认框中找不到确认控件"),
            }
            if self.wait_presence(doc, &confirmation.surface, false).await {
                return true;
            }
            debug!("确认控件 ({:?}) 未生效，升级点击方式", technique);
        }
        false
    }

    async fn dismiss_stray(&self, doc: &dyn DocumentPort, confirmation: &ConfirmationSurface) {
        let Some(dismiss) = &confirmation.dismiss else {
            return;
        };
        if let Some(el) = doc.locate(dismiss).await {
            let technique = self
                .techniques_for(doc)
                .last()
                .copied()
                .unwrap_or(Technique::Programmatic);
            if doc.activate(el, technique).await {
                debug!("已关闭残留确认框");
            }
        }
    }

    /// 轮询等待元素出现 (`present = true`) 或消失，超时或被停止返回 false
    async fn wait_presence(
        &self,
        doc: &dyn DocumentPort,
        descriptor: &ElementDescriptor,
        present: bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + self.modal_timeout;
        loop {
            if doc.locate(descriptor).await.is_some() == present {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            if !self.stop.sleep(self.poll_interval).await {
                return false;
            }
        }
    }

    fn techniques_for(&self, doc: &dyn DocumentPort) -> Vec<Technique> {
        match &self.techniques {
            Some(t) => t.clone(),
            None => {
                let t = doc.techniques();
                if t.is_empty() {
                    vec![Technique::Normal]
                } else {
                    t
                }
            }
        }
    }
}

/// 第 n 次尝试使用的点击方式；超出序列长度时沿用最后一种
fn technique_at(techniques: &[Technique], attempt: u32) -> Technique {
    let index = (attempt.saturating_sub(1) as usize).min(techniques.len().saturating_sub(1));
    techniques.get(index).copied().unwrap_or(Technique::Normal)
}

async fn ensure_session(doc: &dyn DocumentPort) -> AppResult<()> {
    let identity = doc.current_identity().await;
    if identity.session_ok() {
        Ok(())
    } else {
        Err(AppError::session_lost(identity.address))
    }
}

/// 定位并点击
pub async fn click(
    doc: &dyn DocumentPort,
    target: &ElementDescriptor,
    technique: Technique,
) -> AttemptOutcome {
    match doc.locate(target).await {
        Some(el) if doc.activate(el, technique).await => AttemptOutcome::Performed,
        Some(_) => AttemptOutcome::Missed,
        None => {
            debug!("未找到元素: {}", target);
            AttemptOutcome::Missed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::fake::{FakePortal, ACTION_TEXT, CONFIRM_TEXT};
    use crate::workflow::signal::ControlHandle;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn settings() -> VerificationSettings {
        VerificationSettings {
            max_attempts: 3,
            base_delay_ms: 1,
            modal_timeout_ms: 30,
            settle_timeout_ms: 10,
            poll_interval_ms: 2,
        }
    }

    async fn is_flagged(portal: &FakePortal) -> bool {
        portal.locate(&FakePortal::flagged_marker()).await.is_some()
    }

    #[tokio::test]
    async fn never_verified_action_runs_exactly_max_attempts() {
        let portal = FakePortal::paged(1, 1);
        let verifier = ActionVerifier::new(&settings());
        let calls = AtomicU32::new(0);

        let outcome = verifier
            .perform_and_verify(
                &portal,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { AttemptOutcome::Performed }
                },
                || async { false },
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.attempted);
        assert!(!outcome.confirmed);
        assert_eq!(outcome.attempts_used, 3);
    }

    #[tokio::test]
    async fn first_confirmation_ends_the_loop() {
        let portal = FakePortal::paged(1, 1);
        let verifier = ActionVerifier::new(&settings());
        let outcome = verifier
            .click_and_verify(&portal, &FakePortal::action_button(), || is_flagged(&portal))
            .await
            .unwrap();

        assert!(outcome.confirmed);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(portal.calls().techniques_for(ACTION_TEXT), vec![Technique::Normal]);
    }

    #[tokio::test]
    async fn second_attempt_escalates_to_forced_click() {
        let portal = FakePortal::paged(1, 1).tweak(|s| {
            s.effective_techniques = vec![Technique::Forced, Technique::Programmatic];
        });
        let verifier = ActionVerifier::new(&settings());
        let outcome = verifier
            .click_and_verify(&portal, &FakePortal::action_button(), || is_flagged(&portal))
            .await
            .unwrap();

        assert!(outcome.confirmed);
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(
            portal.calls().techniques_for(ACTION_TEXT),
            vec![Technique::Normal, Technique::Forced]
        );
    }

    #[tokio::test]
    async fn injected_technique_set_overrides_document() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.effective_techniques.clear());
        let verifier = ActionVerifier::new(&settings()).with_techniques(vec![Technique::Programmatic]);
        let outcome = verifier
            .click_and_verify(&portal, &FakePortal::action_button(), || is_flagged(&portal))
            .await
            .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(
            portal.calls().techniques_for(ACTION_TEXT),
            vec![Technique::Programmatic; 3]
        );
    }

    #[tokio::test]
    async fn confirmation_surface_is_acknowledged() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.dialog_enabled = true);
        let surface = ConfirmationSurface {
            surface: FakePortal::dialog(),
            control: FakePortal::confirm_button(),
            dismiss: Some(FakePortal::dismiss_button()),
        };
        let outcome = ActionVerifier::new(&settings())
            .perform_with_confirmation(&portal, &FakePortal::action_button(), &surface, || {
                is_flagged(&portal)
            })
            .await
            .unwrap();

        assert!(outcome.confirmed);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(portal.calls().techniques_for(CONFIRM_TEXT).len(), 1);
        assert!(!portal.state().dialog_open);
    }

    #[tokio::test]
    async fn missing_confirmation_surface_fails_fast() {
        let portal = FakePortal::paged(1, 1).tweak(|s| {
            s.dialog_enabled = true;
            s.effective_techniques.clear();
        });
        let surface = ConfirmationSurface {
            surface: FakePortal::dialog(),
            control: FakePortal::confirm_button(),
            dismiss: None,
        };
        let outcome = ActionVerifier::new(&settings())
            .perform_with_confirmation(&portal, &FakePortal::action_button(), &surface, || {
                is_flagged(&portal)
            })
            .await
            .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(outcome.attempts_used, 1);
        assert!(portal.calls().techniques_for(CONFIRM_TEXT).is_empty());
    }

    #[tokio::test]
    async fn lost_session_aborts_with_error() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.on_login = true);
        let err = ActionVerifier::new(&settings())
            .click_and_verify(&portal, &FakePortal::action_button(), || async { true })
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(portal.calls().activations.is_empty());
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        let portal = FakePortal::paged(1, 1);
        let control = ControlHandle::new();
        let verifier = ActionVerifier::new(&VerificationSettings {
            base_delay_ms: 10_000,
            ..settings()
        })
        .with_stop(control.probe());

        let started = Instant::now();
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            control.request_stop();
        };
        let (outcome, _) = tokio::join!(
            verifier.perform_and_verify(&portal, |_| async { AttemptOutcome::Missed }, || async {
                false
            }),
            stopper
        );

        let outcome = outcome.unwrap();
        assert!(outcome.stopped);
        assert_eq!(outcome.attempts_used, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn technique_sequence_saturates_at_last() {
        let seq = Technique::ESCALATION;
        assert_eq!(technique_at(&seq, 1), Technique::Normal);
        assert_eq!(technique_at(&seq, 2), Technique::Forced);
        assert_eq!(technique_at(&seq, 5), Technique::Programmatic);
    }
}
