//! 案件队列服务 - 业务能力层
//!
//! 从 TOML 文件读取待处理案件，按文件顺序逐条吐出

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::services::audit_log::JsonlAuditLog;
use crate::workflow::WorkItemSource;

/// 队列中的一条案件
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueueFile {
    #[serde(default)]
    items: Vec<QueueItem>,
}

#[derive(Debug, Default)]
struct Cursor {
    items: Vec<QueueItem>,
    next: usize,
}

/// TOML 队列
pub struct TomlItemSource {
    path: Option<PathBuf>,
    cursor: Mutex<Cursor>,
    audit: Option<Arc<JsonlAuditLog>>,
}

impl TomlItemSource {
    /// 从 TOML 文件加载队列
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let items = read_items(path).await?;
        info!("✓ 从 {} 加载 {} 条待处理案件", path.display(), items.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            cursor: Mutex::new(Cursor { items, next: 0 }),
            audit: None,
        })
    }

    /// 从 TOML 文本创建（不关联文件，reset 时不会重新读取）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: QueueFile = toml::from_str(content).context("无法解析队列TOML")?;
        Ok(Self {
            path: None,
            cursor: Mutex::new(Cursor {
                items: file.items,
                next: 0,
            }),
            audit: None,
        })
    }

    /// 用审计日志回答"今日是否已处理"
    pub fn with_audit(mut self, audit: Arc<JsonlAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn len(&self) -> usize {
        self.cursor.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn read_items(path: &Path) -> Result<Vec<QueueItem>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取队列文件: {}", path.display()))?;
    let file: QueueFile = toml::from_str(&content)
        .with_context(|| format!("无法解析队列文件: {}", path.display()))?;
    Ok(file.items)
}

#[async_trait]
impl WorkItemSource for TomlItemSource {
    async fn next(&self) -> Result<Option<String>> {
        let mut cursor = self.cursor.lock().await;
        let item = cursor.items.get(cursor.next).cloned();
        if item.is_some() {
            cursor.next += 1;
        }
        Ok(item.map(|i| i.id))
    }

    async fn was_handled_this_period(&self, item_id: &str) -> Result<bool> {
        match &self.audit {
            Some(audit) => audit.handled_today(item_id).await,
            None => Ok(false),
        }
    }

    /// 回到队首；关联了文件时重新读取，读取失败则沿用旧列表
    async fn reset(&self) {
        let mut cursor = self.cursor.lock().await;
        cursor.next = 0;
        if let Some(path) = &self.path {
            match read_items(path).await {
                Ok(items) => cursor.items = items,
                Err(e) => warn!("⚠️ 重新读取队列失败，沿用已加载的列表: {:#}", e),
            }
        }
    }
}
