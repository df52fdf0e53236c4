//! 工作流控制器 - 编排层
//!
//! ## 职责
//!
//! 1. **运行状态**：唯一持有 `WorkflowState`，外部只拿到快照
//! 2. **案件循环**：取案件 → 幂等检查 → 处理 → 审计 → 回到列表页
//! 3. **运行控制**：start / pause / resume / continueNext / stop
//! 4. **错误汇总**：单条案件的错误写进 `errors`，只有会话丢失和列表页导航失败会终止运行
//!
//! 循环在后台任务中执行，`start` 校验完立即返回。所有等待都会按有界间隔检查停止信号。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::{Config, NavigationSettings, VerificationSettings, WorkflowSettings};
use crate::error::{AppError, AppResult};
use crate::infrastructure::DocumentPort;
use crate::navigation::{NavigationEngine, PagerLayout};
use crate::utils::logging::log_run_finished;
use crate::utils::truncate_text;
use crate::verification::ActionVerifier;
use crate::workflow::{
    AuditSink, ControlHandle, ItemCtx, ItemProcessor, RunMode, RunStatus, StopProbe,
    WaitOutcome, WorkItemResult, WorkItemSource, WorkflowState,
};

/// 控制器依赖的外部协作者
pub struct Collaborators {
    pub document: Arc<dyn DocumentPort>,
    pub source: Arc<dyn WorkItemSource>,
    pub audit: Arc<dyn AuditSink>,
    pub processor: Arc<dyn ItemProcessor>,
}

/// 循环结束的原因
#[derive(Debug)]
enum LoopEnd {
    Exhausted,
    Stopped,
    Failed(String),
}

struct ActiveRun {
    control: ControlHandle,
    task: JoinHandle<()>,
}

impl ActiveRun {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// 后台循环与控制器共享的部分
struct Shared {
    document: Arc<dyn DocumentPort>,
    source: Arc<dyn WorkItemSource>,
    audit: Arc<dyn AuditSink>,
    processor: Arc<dyn ItemProcessor>,
    navigator: NavigationEngine,
    verifier: ActionVerifier,
    settings: WorkflowSettings,
    listing_url: String,
    state: watch::Sender<WorkflowState>,
}

/// 工作流控制器
pub struct WorkflowController {
    shared: Arc<Shared>,
    run: Mutex<Option<ActiveRun>>,
}

impl WorkflowController {
    /// 按配置创建控制器
    pub fn new(collaborators: Collaborators, config: &Config, layout: PagerLayout) -> Self {
        Self::with_parts(
            collaborators,
            NavigationEngine::new(&config.navigation, layout),
            ActionVerifier::new(&config.verification),
            config.workflow.clone(),
            config.listing_url.clone(),
        )
    }

    /// 用现成的引擎与确认循环创建控制器
    pub fn with_parts(
        collaborators: Collaborators,
        navigator: NavigationEngine,
        verifier: ActionVerifier,
        settings: WorkflowSettings,
        listing_url: impl Into<String>,
    ) -> Self {
        let (state, _rx) = watch::channel(WorkflowState::default());
        let Collaborators {
            document,
            source,
            audit,
            processor,
        } = collaborators;

        Self {
            shared: Arc::new(Shared {
                document,
                source,
                audit,
                processor,
                navigator,
                verifier,
                settings,
                listing_url: listing_url.into(),
                state,
            }),
            run: Mutex::new(None),
        }
    }

    /// 使用默认翻页与确认参数
    pub fn with_defaults(
        collaborators: Collaborators,
        settings: WorkflowSettings,
        listing_url: impl Into<String>,
    ) -> Self {
        Self::with_parts(
            collaborators,
            NavigationEngine::new(&NavigationSettings::default(), PagerLayout::default()),
            ActionVerifier::new(&VerificationSettings::default()),
            settings,
            listing_url,
        )
    }

    /// 当前状态快照
    pub fn status(&self) -> WorkflowState {
        self.shared.snapshot()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.shared.state.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.as_ref().is_some_and(ActiveRun::is_live)
    }

    /// 开始一次运行
    ///
    /// # 返回
    /// 已在运行返回 `AlreadyRunning`，停在登录页返回 `NotAuthenticated`
    pub async fn start(&self, mode: RunMode) -> AppResult<WorkflowState> {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(ActiveRun::is_live) {
            return Err(AppError::AlreadyRunning);
        }

        let identity = self.shared.document.current_identity().await;
        if identity.on_login_surface {
            warn!("⚠️ 当前停留在登录页，拒绝启动: {}", identity.address);
            return Err(AppError::NotAuthenticated);
        }

        self.shared.source.reset().await;
        self.shared.state.send_modify(|s| s.begin(mode));

        let control = ControlHandle::new();
        let task = tokio::spawn(run_loop(self.shared.clone(), control.probe()));
        *run = Some(ActiveRun { control, task });

        info!("🚀 工作流已启动 (模式: {:?})", mode);
        Ok(self.status())
    }

    /// 请求在下一个案件边界暂停
    pub async fn pause(&self) -> AppResult<WorkflowState> {
        let run = self.run.lock().await;
        let Some(active) = run.as_ref().filter(|r| r.is_live()) else {
            return Err(AppError::NotRunning);
        };
        active.control.request_pause();
        info!("⏸️ 已请求暂停，将在当前案件结束后生效");
        Ok(self.status())
    }

    /// 继续运行；不在暂停状态时什么也不做
    pub async fn resume(&self) -> AppResult<WorkflowState> {
        let run = self.run.lock().await;
        if let Some(active) = run.as_ref().filter(|r| r.is_live()) {
            self.release(active);
        }
        Ok(self.status())
    }

    /// 手动模式下再处理一条，然后重新暂停
    pub async fn continue_next(&self) -> AppResult<WorkflowState> {
        let run = self.run.lock().await;
        let snapshot = self.status();
        if snapshot.mode != RunMode::Manual {
            return Err(AppError::NotManualMode);
        }
        if snapshot.status != RunStatus::Paused {
            return Err(AppError::NotPaused);
        }
        match run.as_ref().filter(|r| r.is_live()) {
            Some(active) => {
                self.release(active);
                Ok(self.status())
            }
            None => Err(AppError::NotRunning),
        }
    }

    /// 停止运行并释放会话
    ///
    /// 等待后台任务在宽限时间内退出，超时则强制取消。
    pub async fn stop(&self) -> AppResult<WorkflowState> {
        let mut run = self.run.lock().await;
        let Some(ActiveRun { control, mut task }) = run.take() else {
            return Ok(self.status());
        };

        control.request_stop();
        let grace = self.shared.settings.stop_grace();
        if timeout(grace, &mut task).await.is_err() {
            warn!("⚠️ 后台任务未在 {:?} 内退出，强制取消", grace);
            task.abort();
        }

        self.shared.document.release().await;
        self.shared.state.send_modify(|s| s.stopped());
        info!("⏹️ 工作流已停止");
        Ok(self.status())
    }

    /// 先改状态再放行，避免覆盖循环随后写入的新暂停
    fn release(&self, active: &ActiveRun) {
        let resumed = self.shared.state.send_if_modified(|s| s.resumed());
        if resumed {
            active.control.release();
            info!("▶️ 已放行");
        }
    }
}

async fn run_loop(shared: Arc<Shared>, stop: StopProbe) {
    let started = Instant::now();
    let navigator = shared.navigator.clone().with_stop(stop.clone());
    let verifier = shared.verifier.clone().with_stop(stop.clone());

    let end = shared.drive(&navigator, &verifier, &stop).await;
    match &end {
        LoopEnd::Exhausted => shared.update(&stop, |s| s.complete()),
        LoopEnd::Failed(reason) => {
            error!("❌ 运行终止: {}", reason);
            let max_errors = shared.settings.max_errors_surfaced;
            shared.update(&stop, |s| s.fail(reason.clone(), max_errors));
        }
        LoopEnd::Stopped => info!("⏹️ 循环收到停止信号"),
    }

    log_run_finished(&shared.snapshot(), started.elapsed());
}

impl Shared {
    fn snapshot(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    /// 停止信号发出后，循环的写入一律丢弃
    fn update(&self, stop: &StopProbe, f: impl FnOnce(&mut WorkflowState)) {
        self.state.send_if_modified(|s| {
            if stop.is_stopped() {
                return false;
            }
            f(s);
            true
        });
    }

    async fn drive(
        &self,
        navigator: &NavigationEngine,
        verifier: &ActionVerifier,
        stop: &StopProbe,
    ) -> LoopEnd {
        if let Err(end) = self.return_to_listing().await {
            return end;
        }

        let max_errors = self.settings.max_errors_surfaced;
        let mut index = 0usize;

        loop {
            if stop.is_stopped() {
                return LoopEnd::Stopped;
            }

            let item_id = match self.source.next().await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    info!("✓ 队列中已没有待处理案件");
                    return LoopEnd::Exhausted;
                }
                Err(e) => return LoopEnd::Failed(format!("work item source failed: {:#}", e)),
            };
            self.update(stop, |s| {
                s.navigating();
                s.saw_item();
            });

            if self.already_handled(&item_id).await {
                info!("[案件 {}] ⏭️ 本周期已处理，跳过", item_id);
                self.record(&WorkItemResult::skipped(&item_id, "already handled this period"))
                    .await;
                self.update(stop, |s| s.skipped());
                continue;
            }

            let identity = self.document.current_identity().await;
            if !identity.session_ok() {
                return LoopEnd::Failed(format!("session lost: {}", identity.address));
            }

            index += 1;
            self.update(stop, |s| s.processing(&item_id));

            let ctx = ItemCtx::new(
                &item_id,
                index,
                self.document.as_ref(),
                navigator,
                verifier,
                stop.clone(),
            );
            info!("{} ▶ 开始处理", ctx);

            let mut fatal = None;
            let result = match self.processor.process(&ctx).await {
                Ok(report) if report.success => {
                    info!("{} ✓ 处理成功", ctx);
                    WorkItemResult::success(&item_id, report.detail)
                }
                Ok(report) => {
                    let detail = report
                        .detail
                        .unwrap_or_else(|| "item processing failed".to_string());
                    warn!("{} ⚠️ 处理失败: {}", ctx, truncate_text(&detail, 200));
                    WorkItemResult::failure(&item_id, detail)
                }
                Err(e) => {
                    error!("{} ❌ 处理出错: {}", ctx, e);
                    let result = WorkItemResult::failure(&item_id, e.to_string());
                    if e.is_fatal() {
                        fatal = Some(e);
                    }
                    result
                }
            };

            let item_error = (!result.is_success()).then(|| {
                format!(
                    "[{}] {}",
                    item_id,
                    result.detail().unwrap_or("item processing failed")
                )
            });
            self.update(stop, |s| s.item_finished(item_error, max_errors));
            self.record(&result).await;

            if let Some(e) = fatal {
                let address = e.lost_address().unwrap_or_default();
                return LoopEnd::Failed(format!("session lost: {}", address));
            }
            if stop.is_stopped() {
                return LoopEnd::Stopped;
            }
            if !result.is_success() && !self.settings.continue_on_error {
                return LoopEnd::Failed(format!(
                    "item {} failed and continue_on_error is disabled",
                    item_id
                ));
            }

            if let Err(end) = self.return_to_listing().await {
                return end;
            }

            let mode = self.snapshot().mode;
            if mode == RunMode::Manual || stop.pause_requested() {
                let reason = if mode == RunMode::Manual {
                    "waiting for operator"
                } else {
                    "paused by operator"
                };
                if let Some(end) = self.hold(stop, reason).await {
                    return end;
                }
            } else {
                if !stop.sleep(self.settings.inter_item_delay()).await {
                    return LoopEnd::Stopped;
                }
                if stop.pause_requested() {
                    if let Some(end) = self.hold(stop, "paused by operator").await {
                        return end;
                    }
                }
            }
        }
    }

    /// 暂停并等待放行
    async fn hold(&self, stop: &StopProbe, reason: &str) -> Option<LoopEnd> {
        let seen = stop.releases();
        self.update(stop, |s| {
            s.paused(reason);
        });
        info!("⏸️ 已暂停: {}", reason);

        match stop
            .wait_for_release(seen, self.settings.poll_interval())
            .await
        {
            WaitOutcome::Stopped => Some(LoopEnd::Stopped),
            WaitOutcome::Released(_) => None,
        }
    }

    /// 回到列表页并确认会话仍然有效
    async fn return_to_listing(&self) -> Result<(), LoopEnd> {
        if !self.document.navigate(&self.listing_url).await {
            return Err(LoopEnd::Failed(format!(
                "listing navigation failed: {}",
                self.listing_url
            )));
        }
        if !self.document.wait_settled(self.settings.settle_timeout()).await {
            warn!("⚠️ 列表页未在超时内稳定，继续执行");
        }

        let identity = self.document.current_identity().await;
        if !identity.session_ok() {
            return Err(LoopEnd::Failed(format!("session lost: {}", identity.address)));
        }
        Ok(())
    }

    /// 幂等检查；出错或超时按"未处理"对待
    async fn already_handled(&self, item_id: &str) -> bool {
        let limit = self.settings.idempotency_timeout();
        match timeout(limit, self.source.was_handled_this_period(item_id)).await {
            Ok(Ok(handled)) => handled,
            Ok(Err(e)) => {
                warn!("[案件 {}] ⚠️ 幂等检查失败，按未处理对待: {:#}", item_id, e);
                false
            }
            Err(_) => {
                warn!("[案件 {}] ⚠️ 幂等检查超时 ({:?})，按未处理对待", item_id, limit);
                false
            }
        }
    }

    async fn record(&self, result: &WorkItemResult) {
        if let Err(e) = self.audit.record(result).await {
            warn!("[案件 {}] ⚠️ 审计记录写入失败: {:#}", result.item_id(), e);
        }
    }
}
