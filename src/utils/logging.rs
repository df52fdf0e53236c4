//! 日志工具模块
//!
//! 提供 tracing 初始化以及日志格式化和输出的辅助函数
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::workflow::{RunStatus, WorkflowState};

/// 初始化 tracing
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info。
/// 重复调用不会报错（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},chromiumoxide=warn", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
///
/// # 返回
/// 返回是否成功初始化
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(log_file_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建日志目录失败: {}", parent.display()))?;
        }
    }
    let log_header = format!(
        "{}\n案件处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("写入日志文件失败: {}", log_file_path))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 案件门户自动化");
    info!("🌐 列表页: {}", config.listing_url);
    info!("🔌 控制端口: {}", config.http_port);
    info!(
        "🔁 最大尝试次数: {} / 跳页阈值: {}",
        config.verification.max_attempts, config.navigation.jump_threshold
    );
    info!("{}", "=".repeat(60));
}

/// 打印一次运行的统计信息
///
/// # 参数
/// - `state`: 运行结束时的状态快照
/// - `elapsed`: 运行耗时
pub fn log_run_finished(state: &WorkflowState, elapsed: Duration) {
    info!("\n{}", "=".repeat(60));
    info!("📊 本次运行统计 ({})", state.status);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📄 已读取: {}", state.total_seen);
    info!("✅ 已处理: {}", state.processed_count);
    info!("⏭️ 已跳过: {}", state.skipped_count);
    info!("❌ 失败: {}", state.failed_count);
    info!("⏱️ 耗时: {:.1}s", elapsed.as_secs_f64());
    if state.status == RunStatus::Error {
        if let Some(reason) = &state.status_reason {
            warn!("⚠️ 终止原因: {}", reason);
        }
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
