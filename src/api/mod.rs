//! HTTP 控制接口
//!
//! 把控制器的 start / pause / resume / stop / continueNext / status
//! 暴露为 JSON 接口，供面板或脚本调用。

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::orchestrator::WorkflowController;

pub use handlers::ApiError;
pub use types::{HealthResponse, StartRequest, StartResponse};

/// 构建路由
pub fn router(controller: Arc<WorkflowController>, cors: bool) -> Router {
    let mut app = Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Workflow control
        .route("/api/workflow/start", post(handlers::start))
        .route("/api/workflow/pause", post(handlers::pause))
        .route("/api/workflow/resume", post(handlers::resume))
        .route("/api/workflow/stop", post(handlers::stop))
        .route("/api/workflow/continue-next", post(handlers::continue_next))
        .route("/api/workflow/status", get(handlers::status))
        .with_state(controller)
        .layer(TraceLayer::new_for_http());

    if cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    app
}
