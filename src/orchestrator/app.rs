//! 应用启动器 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、连接或启动浏览器、创建 JsExecutor 与文档适配器
//! 2. **装配协作者**：案件队列、审计日志、操作计划处理器
//! 3. **资源管理**：唯一持有 Browser，保证会话在整个进程内只有一个
//! 4. **对外服务**：启动 HTTP 控制接口，收到 Ctrl+C 后停止工作流再退出

use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::Browser;
use tracing::{info, warn};

use crate::api;
use crate::browser::{self, CdpDocument};
use crate::config::Config;
use crate::infrastructure::JsExecutor;
use crate::orchestrator::controller::{Collaborators, WorkflowController};
use crate::services::{JsonlAuditLog, PlanProcessor, TomlItemSource};
use crate::utils::logging::{init_log_file, log_startup};

/// 应用主结构
pub struct App {
    config: Config,
    _browser: Browser,
    controller: Arc<WorkflowController>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        // 初始化日志文件
        init_log_file(&config.output_log_file)?;
        log_startup(&config);

        // 连接浏览器
        let (browser, page) = if config.headless {
            browser::launch_headless_browser(
                &config.listing_url,
                config.chrome_executable.as_deref(),
            )
            .await?
        } else {
            browser::connect_to_browser_and_page(
                config.browser_debug_port,
                Some(&config.listing_url),
                Some(&config.expected_domain),
            )
            .await?
        };

        // 创建 JsExecutor（持有 page）
        let executor = JsExecutor::new(page);
        let document = Arc::new(CdpDocument::new(executor, &config));

        let audit = Arc::new(JsonlAuditLog::new(&config.audit_log_file));
        let source = TomlItemSource::load(&config.queue_file)
            .await?
            .with_audit(audit.clone());
        let processor = PlanProcessor::load(&config.plan_file).await?;

        let controller = WorkflowController::new(
            Collaborators {
                document,
                source: Arc::new(source),
                audit,
                processor: Arc::new(processor),
            },
            &config,
            config.pager.clone(),
        );

        Ok(Self {
            config,
            _browser: browser,
            controller: Arc::new(controller),
        })
    }

    pub fn controller(&self) -> Arc<WorkflowController> {
        self.controller.clone()
    }

    /// 启动 HTTP 控制接口，直到收到 Ctrl+C
    pub async fn run(&self, cors: bool) -> Result<()> {
        let app = api::router(self.controller.clone(), cors);

        let addr = format!("0.0.0.0:{}", self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听 {}", addr))?;

        info!("✅ 控制接口已启动: http://{}", addr);
        info!("💡 POST /api/workflow/start {{\"mode\": \"manual\" | \"automatic\"}}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("正在停止工作流...");
        if let Err(e) = self.controller.stop().await {
            warn!("⚠️ 停止工作流失败: {}", e);
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ 无法监听 Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到退出信号");
}
