//! 审计日志服务 - 业务能力层
//!
//! 只负责"写一行 JSON / 查今日是否处理过"，不关心流程

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::workflow::{AuditSink, WorkItemResult};

/// 审计日志中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recorded_at: DateTime<Local>,
    #[serde(flatten)]
    pub result: WorkItemResult,
}

/// JSON Lines 审计日志
///
/// 每条结果追加一行，写入按调用顺序串行进行
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    /// 创建审计日志服务（文件在首次写入时创建）
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录
    ///
    /// # 参数
    /// - `result`: 单条案件的处理结果
    pub async fn append(&self, result: &WorkItemResult) -> Result<()> {
        let record = AuditRecord {
            recorded_at: Local::now(),
            result: result.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("无法创建审计目录: {}", parent.display()))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("无法打开审计日志: {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("[案件 {}] 审计记录已写入", result.item_id());
        Ok(())
    }

    /// 读取全部记录（无法解析的行被跳过）
    pub async fn records(&self) -> Result<Vec<AuditRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("无法读取审计日志: {}", self.path.display()))
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("跳过无法解析的审计行: {}", e);
                    None
                }
            })
            .collect())
    }

    /// 今天是否已有该案件的成功记录
    pub async fn handled_today(&self, item_id: &str) -> Result<bool> {
        let today = Local::now().date_naive();
        Ok(self.records().await?.iter().any(|r| {
            r.result.item_id() == item_id
                && r.result.is_success()
                && r.recorded_at.date_naive() == today
        }))
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, result: &WorkItemResult) -> Result<()> {
        self.append(result).await
    }
}
