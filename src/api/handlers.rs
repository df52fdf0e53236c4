use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

use crate::api::types::{HealthResponse, StartRequest, StartResponse};
use crate::error::AppError;
use crate::orchestrator::WorkflowController;
use crate::workflow::WorkflowState;

// ============================================================================
// Error Handling
// ============================================================================

pub struct ApiError(AppError);

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            AppError::AlreadyRunning
            | AppError::NotRunning
            | AppError::NotPaused
            | AppError::NotManualMode => StatusCode::CONFLICT,
            AppError::NotAuthenticated | AppError::SessionLost { .. } => StatusCode::UNAUTHORIZED,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "code": self.0.kind(),
            })),
        )
            .into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        warn!("⚠️ 请求被拒绝: {}", err);
        ApiError(err)
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Health Check
// ============================================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Workflow Control
// ============================================================================

pub async fn start(
    State(controller): State<Arc<WorkflowController>>,
    Json(request): Json<StartRequest>,
) -> ApiResult<StartResponse> {
    info!("📥 POST /api/workflow/start - mode: {:?}", request.mode);
    let state = controller.start(request.mode).await?;
    Ok(Json(StartResponse {
        accepted: true,
        state,
    }))
}

pub async fn pause(State(controller): State<Arc<WorkflowController>>) -> ApiResult<WorkflowState> {
    info!("📥 POST /api/workflow/pause");
    Ok(Json(controller.pause().await?))
}

pub async fn resume(
    State(controller): State<Arc<WorkflowController>>,
) -> ApiResult<WorkflowState> {
    info!("📥 POST /api/workflow/resume");
    Ok(Json(controller.resume().await?))
}

pub async fn stop(State(controller): State<Arc<WorkflowController>>) -> ApiResult<WorkflowState> {
    info!("📥 POST /api/workflow/stop");
    Ok(Json(controller.stop().await?))
}

pub async fn continue_next(
    State(controller): State<Arc<WorkflowController>>,
) -> ApiResult<WorkflowState> {
    info!("📥 POST /api/workflow/continue-next");
    Ok(Json(controller.continue_next().await?))
}

pub async fn status(State(controller): State<Arc<WorkflowController>>) -> Json<WorkflowState> {
    Json(controller.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowSettings;
    use crate::infrastructure::fake::FakePortal;
    use crate::orchestrator::Collaborators;
    use crate::workflow::{
        AuditSink, ItemCtx, ItemProcessor, ItemReport, RunMode, RunStatus, WorkItemResult,
        WorkItemSource,
    };
    use async_trait::async_trait;

    struct Endless;

    #[async_trait]
    impl WorkItemSource for Endless {
        async fn next(&self) -> anyhow::Result<Option<String>> {
            Ok(Some("C-1".to_string()))
        }

        async fn was_handled_this_period(&self, _item_id: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct Discard;

    #[async_trait]
    impl AuditSink for Discard {
        async fn record(&self, _result: &WorkItemResult) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Done;

    #[async_trait]
    impl ItemProcessor for Done {
        async fn process(&self, _ctx: &ItemCtx<'_>) -> crate::error::AppResult<ItemReport> {
            Ok(ItemReport::success("done"))
        }
    }

    fn controller(portal: FakePortal) -> Arc<WorkflowController> {
        Arc::new(WorkflowController::with_defaults(
            Collaborators {
                document: Arc::new(portal),
                source: Arc::new(Endless),
                audit: Arc::new(Discard),
                processor: Arc::new(Done),
            },
            WorkflowSettings {
                inter_item_delay_ms: 50,
                poll_interval_ms: 5,
                settle_timeout_ms: 5,
                ..WorkflowSettings::default()
            },
            "https://portal.test/cases?page=1",
        ))
    }

    #[tokio::test]
    async fn health_reports_version() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn second_start_maps_to_conflict() {
        let controller = controller(FakePortal::paged(1, 1));

        let Json(first) = start(
            State(controller.clone()),
            Json(StartRequest {
                mode: RunMode::Manual,
            }),
        )
        .await
        .map_err(|e| e.0.to_string())
        .unwrap();
        assert!(first.accepted);
        assert_eq!(first.state.mode, RunMode::Manual);

        let err = start(
            State(controller.clone()),
            Json(StartRequest {
                mode: RunMode::Manual,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let Json(state) = stop(State(controller)).await.map_err(|e| e.0.to_string()).unwrap();
        assert_eq!(state.status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn login_surface_maps_to_unauthorized() {
        let controller = controller(FakePortal::paged(1, 1).tweak(|s| s.on_login = true));
        let err = start(
            State(controller),
            Json(StartRequest {
                mode: RunMode::Automatic,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn continue_next_outside_manual_mode_conflicts() {
        let controller = controller(FakePortal::paged(1, 1));
        let err = continue_next(State(controller.clone())).await.err().unwrap();
        assert_eq!(err.0.kind(), "not_manual_mode");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let Json(state) = status(State(controller)).await;
        assert_eq!(state.status, RunStatus::Idle);
    }
}
