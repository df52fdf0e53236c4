//! 操作计划处理器 - 业务能力层
//!
//! 用 TOML 描述"打开一条案件并依次执行哪些可确认的操作"，
//! 每一步都走翻页引擎与操作确认循环。
//!
//! ```toml
//! [open]
//! url_template = "https://portal.example.com/cases/{id}"
//!
//! [[steps]]
//! name = "flag"
//! target = { role = "button", text = "Flag" }
//! confirm = { surface = { role = "dialog" }, control = { role = "button", text = "Continue" } }
//! verify = { descriptor = { role = "text", text = "Flagged" } }
//! ```

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult, ConfigError};
use crate::infrastructure::{DocumentPort, ElementDescriptor};
use crate::navigation::{NavigationTarget, NotReached};
use crate::verification::{ActionOutcome, ConfirmationSurface};
use crate::workflow::{ItemCtx, ItemProcessor, ItemReport};

const ID_PLACEHOLDER: &str = "{id}";

/// 操作计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub open: OpenItem,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

/// 如何打开一条案件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenItem {
    /// 直接地址，`{id}` 替换为案件 ID
    #[serde(default)]
    pub url_template: Option<String>,
    /// 列表页中的案件行，`{id}` 替换为案件 ID
    #[serde(default)]
    pub row: Option<ElementDescriptor>,
    /// 点击行之前先翻到列表的第几页
    #[serde(default)]
    pub page: Option<u32>,
    /// 打开成功的判据；缺省时以地址发生变化为准
    #[serde(default)]
    pub verify: Option<StepCheck>,
}

/// 单个步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    pub target: ElementDescriptor,
    /// 案件内分页：执行前先到达该页
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub confirm: Option<ConfirmationSurface>,
    pub verify: StepCheck,
    #[serde(default)]
    pub stop_on_failure: bool,
}

/// 远端状态检查
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCheck {
    pub descriptor: ElementDescriptor,
    /// 期望元素存在（false 表示期望消失）
    #[serde(default = "default_present")]
    pub present: bool,
    #[serde(default)]
    pub text_contains: Option<String>,
}

fn default_present() -> bool {
    true
}

impl StepCheck {
    async fn holds(&self, doc: &dyn DocumentPort, item_id: &str) -> bool {
        let descriptor = self.descriptor.substitute(ID_PLACEHOLDER, item_id);
        match doc.locate(&descriptor).await {
            Some(el) if self.present => match &self.text_contains {
                Some(needle) => doc
                    .read_text(el)
                    .await
                    .contains(&needle.replace(ID_PLACEHOLDER, item_id)),
                None => true,
            },
            Some(_) => false,
            None => !self.present,
        }
    }
}

impl ActionPlan {
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let plan: ActionPlan = toml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.open.url_template.is_none() && self.open.row.is_none() {
            return Err(ConfigError::Invalid {
                field: "open".to_string(),
                reason: "需要 url_template 或 row 之一".to_string(),
            }
            .into());
        }
        if let Some(step) = self.steps.iter().find(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "steps.name".to_string(),
                reason: format!("步骤名不能为空 (target: {})", step.target),
            }
            .into());
        }
        Ok(())
    }
}

/// 按计划处理单条案件
pub struct PlanProcessor {
    plan: ActionPlan,
}

impl PlanProcessor {
    pub fn new(plan: ActionPlan) -> Self {
        Self { plan }
    }

    /// 从 TOML 文件加载计划
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取操作计划: {}", path.display()))?;
        let plan = ActionPlan::from_toml_str(&content)
            .with_context(|| format!("无法解析操作计划: {}", path.display()))?;
        info!(
            "✓ 已加载操作计划 {} ({} 个步骤)",
            path.display(),
            plan.steps.len()
        );
        Ok(Self::new(plan))
    }

    pub fn plan(&self) -> &ActionPlan {
        &self.plan
    }

    /// 打开案件；返回 Ok(Err(原因)) 表示非致命失败
    async fn open(&self, ctx: &ItemCtx<'_>) -> AppResult<Result<(), String>> {
        let doc = ctx.document;
        let open = &self.plan.open;

        if let Some(template) = &open.url_template {
            let address = template.replace(ID_PLACEHOLDER, ctx.item_id);
            if !doc.navigate(&address).await {
                return Ok(Err(format!("无法打开案件地址: {}", address)));
            }
            doc.wait_settled(ctx.verifier.settle_timeout()).await;
            ensure_session(doc).await?;
            if let Some(check) = &open.verify {
                if !check.holds(doc, ctx.item_id).await {
                    return Ok(Err(format!(
                        "打开后校验未通过: {}",
                        check.descriptor.substitute(ID_PLACEHOLDER, ctx.item_id)
                    )));
                }
            }
            return Ok(Ok(()));
        }

        let Some(row) = &open.row else {
            return Ok(Err("计划中没有打开案件的方式".to_string()));
        };

        if let Some(page) = open.page {
            if let Err(reason) = reach(ctx, page).await? {
                return Ok(Err(reason));
            }
        }

        let row = row.substitute(ID_PLACEHOLDER, ctx.item_id);
        let before = doc.current_identity().await.address;
        let outcome = match &open.verify {
            Some(check) => {
                ctx.verifier
                    .click_and_verify(doc, &row, || check.holds(doc, ctx.item_id))
                    .await?
            }
            None => {
                let before = before.as_str();
                ctx.verifier
                    .click_and_verify(doc, &row, move || async move {
                        doc.current_identity().await.address != before
                    })
                    .await?
            }
        };

        if !outcome.confirmed {
            ensure_session(doc).await?;
        }
        match describe_failure("open", &outcome) {
            None => Ok(Ok(())),
            Some(reason) => Ok(Err(reason)),
        }
    }

    /// 执行一个步骤；返回 Ok(Some(原因)) 表示步骤失败
    async fn run_step(&self, ctx: &ItemCtx<'_>, step: &PlanStep) -> AppResult<Option<String>> {
        let doc = ctx.document;

        if let Some(page) = step.page {
            if let Err(reason) = reach(ctx, page).await? {
                return Ok(Some(format!("{}: {}", step.name, reason)));
            }
        }

        let target = step.target.substitute(ID_PLACEHOLDER, ctx.item_id);
        let verify = || step.verify.holds(doc, ctx.item_id);
        let outcome = match &step.confirm {
            Some(confirm) => {
                let confirm = ConfirmationSurface {
                    surface: confirm.surface.substitute(ID_PLACEHOLDER, ctx.item_id),
                    control: confirm.control.substitute(ID_PLACEHOLDER, ctx.item_id),
                    dismiss: confirm
                        .dismiss
                        .as_ref()
                        .map(|d| d.substitute(ID_PLACEHOLDER, ctx.item_id)),
                };
                ctx.verifier
                    .perform_with_confirmation(doc, &target, &confirm, verify)
                    .await?
            }
            None => ctx.verifier.click_and_verify(doc, &target, verify).await?,
        };

        // 未确认可能是会话已丢失，必须区分
        if !outcome.confirmed {
            ensure_session(doc).await?;
        }
        Ok(describe_failure(&step.name, &outcome))
    }
}

#[async_trait]
impl ItemProcessor for PlanProcessor {
    async fn process(&self, ctx: &ItemCtx<'_>) -> AppResult<ItemReport> {
        if let Err(reason) = self.open(ctx).await? {
            warn!("{} ⚠️ 打开案件失败: {}", ctx, reason);
            return Ok(ItemReport::failure(reason));
        }
        info!("{} 📂 已打开案件", ctx);

        let mut failures = Vec::new();
        let mut done = 0usize;
        for step in &self.plan.steps {
            if ctx.stop.is_stopped() {
                failures.push("stopped".to_string());
                break;
            }

            match self.run_step(ctx, step).await? {
                None => {
                    done += 1;
                    info!("{} ✓ 步骤 {} 已确认", ctx, step.name);
                }
                Some(reason) => {
                    warn!("{} ⚠️ 步骤失败: {}", ctx, reason);
                    failures.push(reason);
                    if step.stop_on_failure {
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(ItemReport::success(format!("{} 个步骤已确认", done)))
        } else {
            Ok(ItemReport::failure(failures.join("; ")))
        }
    }
}

/// 翻页；会话丢失升级为致命错误，其余失败返回原因
async fn reach(ctx: &ItemCtx<'_>, page: u32) -> AppResult<Result<(), String>> {
    match ctx
        .navigator
        .reach(ctx.document, NavigationTarget::page(page))
        .await
    {
        Ok(_) => Ok(Ok(())),
        Err(e @ NotReached::SessionLost { .. }) => Err(AppError::Navigation(e)),
        Err(e) => Ok(Err(e.to_string())),
    }
}

async fn ensure_session(doc: &dyn DocumentPort) -> AppResult<()> {
    let identity = doc.current_identity().await;
    if identity.session_ok() {
        Ok(())
    } else {
        Err(AppError::session_lost(identity.address))
    }
}

fn describe_failure(action: &str, outcome: &ActionOutcome) -> Option<String> {
    if outcome.confirmed {
        return None;
    }
    if outcome.stopped {
        return Some(format!("{}: stopped", action));
    }
    Some(
        AppError::Verification {
            action: action.to_string(),
            attempts: outcome.attempts_used,
        }
        .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavigationSettings, VerificationSettings};
    use crate::infrastructure::fake::FakePortal;
    use crate::infrastructure::Technique;
    use crate::navigation::{NavigationEngine, PagerLayout};
    use crate::verification::ActionVerifier;
    use crate::workflow::StopProbe;

    const PLAN: &str = r#"
        [open]
        url_template = "https://portal.test/cases/{id}"

        [[steps]]
        name = "flag"
        target = { role = "button", text = "Flag" }
        confirm = { surface = { role = "dialog" }, control = { role = "button", text = "Continue" }, dismiss = { role = "button", text = "Cancel" } }
        verify = { descriptor = { role = "text", text = "Flagged" } }
    "#;

    fn verifier() -> ActionVerifier {
        ActionVerifier::new(&VerificationSettings {
            max_attempts: 2,
            base_delay_ms: 1,
            modal_timeout_ms: 20,
            settle_timeout_ms: 5,
            poll_interval_ms: 2,
        })
    }

    async fn run(portal: &FakePortal, plan: ActionPlan) -> AppResult<ItemReport> {
        let navigator = NavigationEngine::new(&NavigationSettings::default(), PagerLayout::default());
        let verifier = verifier();
        let ctx = ItemCtx::new("C-7", 1, portal, &navigator, &verifier, StopProbe::detached());
        PlanProcessor::new(plan).process(&ctx).await
    }

    #[test]
    fn plan_parses_inline_descriptors() {
        let plan = ActionPlan::from_toml_str(PLAN).unwrap();
        assert_eq!(plan.steps.len(), 1);
        let step = &plan.steps[0];
        assert!(step.confirm.is_some());
        assert!(step.verify.present);
        assert!(!step.stop_on_failure);
    }

    #[test]
    fn plan_without_open_method_is_rejected() {
        let err = ActionPlan::from_toml_str("[open]\npage = 2\n").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn confirmed_steps_make_a_successful_report() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.dialog_enabled = true);
        let report = run(&portal, ActionPlan::from_toml_str(PLAN).unwrap())
            .await
            .unwrap();

        assert!(report.success, "{:?}", report.detail);
        assert_eq!(
            portal.calls().navigations,
            vec!["https://portal.test/cases/C-7".to_string()]
        );
    }

    #[tokio::test]
    async fn unconfirmed_step_is_reported_not_thrown() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.effective_techniques.clear());
        let mut plan = ActionPlan::from_toml_str(PLAN).unwrap();
        plan.steps[0].confirm = None;

        let report = run(&portal, plan).await.unwrap();
        assert!(!report.success);
        assert!(report.detail.unwrap().contains("flag"));
        assert_eq!(portal.calls().techniques_for("Flag").len(), 2);
    }

    #[tokio::test]
    async fn stop_on_failure_skips_later_steps() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.effective_techniques = vec![Technique::Programmatic]);
        let mut plan = ActionPlan::from_toml_str(PLAN).unwrap();
        plan.steps[0].confirm = None;
        plan.steps[0].stop_on_failure = true;
        let mut second = plan.steps[0].clone();
        second.name = "second".into();
        plan.steps.push(second);

        let report = run(&portal, plan).await.unwrap();
        assert!(!report.success);
        assert_eq!(portal.calls().techniques_for("Flag").len(), 2);
    }

    #[tokio::test]
    async fn step_paging_uses_the_navigator() {
        let portal = FakePortal::paged(1, 5);
        let mut plan = ActionPlan::from_toml_str(PLAN).unwrap();
        plan.steps[0].confirm = None;
        plan.steps[0].page = Some(3);

        let report = run(&portal, plan).await.unwrap();
        assert!(report.success, "{:?}", report.detail);
        assert_eq!(portal.state().current_page, 3);
    }

    fn plan_with_open_check() -> ActionPlan {
        let mut plan = ActionPlan::from_toml_str(PLAN).unwrap();
        plan.open.verify = Some(StepCheck {
            descriptor: ElementDescriptor::new(crate::infrastructure::Role::Text)
                .with_text("Case {id}"),
            present: true,
            text_contains: None,
        });
        plan
    }

    #[tokio::test]
    async fn lost_session_wins_over_failed_open_check() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.domain_ok = false);
        let err = run(&portal, plan_with_open_check()).await.unwrap_err();
        assert!(err.is_fatal(), "{}", err);
        assert_eq!(err.kind(), "session_lost");
    }

    #[tokio::test]
    async fn failed_open_check_names_the_item() {
        let portal = FakePortal::paged(1, 1);
        let report = run(&portal, plan_with_open_check()).await.unwrap();
        assert!(!report.success);
        let detail = report.detail.unwrap();
        assert!(detail.contains("Case C-7"), "{}", detail);
        assert!(!detail.contains("{id}"), "{}", detail);
    }

    #[tokio::test]
    async fn session_lost_during_unconfirmed_step_is_fatal() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.effective_techniques.clear());
        let mut plan = ActionPlan::from_toml_str(PLAN).unwrap();
        plan.steps[0].confirm = None;
        let navigator = NavigationEngine::new(&NavigationSettings::default(), PagerLayout::default());
        let verifier = verifier();
        let ctx = ItemCtx::new("C-7", 1, &portal, &navigator, &verifier, StopProbe::detached());
        let processor = PlanProcessor::new(plan);
        processor.open(&ctx).await.unwrap().unwrap();

        portal.set(|s| s.domain_ok = false);
        let err = processor.run_step(&ctx, &processor.plan.steps[0]).await.unwrap_err();
        assert!(err.is_fatal(), "{}", err);
    }

    #[tokio::test]
    async fn lost_session_after_open_is_fatal() {
        let portal = FakePortal::paged(1, 1).tweak(|s| s.domain_ok = false);
        let err = run(&portal, ActionPlan::from_toml_str(PLAN).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
