use serde::{Deserialize, Serialize};

use crate::workflow::{RunMode, WorkflowState};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub mode: RunMode,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub accepted: bool,
    pub state: WorkflowState,
}
