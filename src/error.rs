use thiserror::Error;

use crate::navigation::NotReached;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),

    /// 翻页策略链全部失败，或到达后校验不通过
    #[error("导航失败: {0}")]
    Navigation(#[from] NotReached),

    /// 动作执行后始终无法确认生效
    #[error("操作未确认: {action} (已尝试 {attempts} 次)")]
    Verification { action: String, attempts: u32 },

    /// 会话丢失（跳转到登录页或离开目标域名），整个运行必须终止
    #[error("会话丢失: 当前地址 {address}")]
    SessionLost { address: String },

    /// 协作方（审计、队列等）失败
    #[error("协作方错误: {0}")]
    Collaborator(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 已有运行中的工作流
    #[error("already running: 工作流已在运行中")]
    AlreadyRunning,

    /// 浏览器停留在登录页
    #[error("not authenticated: 当前会话未登录")]
    NotAuthenticated,

    /// 当前没有运行中的工作流
    #[error("工作流未在运行")]
    NotRunning,

    /// 需要处于暂停状态
    #[error("工作流未处于暂停状态")]
    NotPaused,

    /// 仅手动模式可用
    #[error("仅手动模式支持逐条继续")]
    NotManualMode,

    /// 文件读写错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

impl AppError {
    /// 是否为必须立即终止整个运行的错误
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::SessionLost { .. } => true,
            AppError::Navigation(reason) => reason.is_session_lost(),
            _ => false,
        }
    }

    /// 会话丢失时的页面地址
    pub fn lost_address(&self) -> Option<&str> {
        match self {
            AppError::SessionLost { address }
            | AppError::Navigation(NotReached::SessionLost { address }) => Some(address),
            _ => None,
        }
    }

    /// 供 HTTP 层使用的错误种类标识
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Browser(_) => "browser",
            AppError::Navigation(_) => "navigation",
            AppError::Verification { .. } => "verification",
            AppError::SessionLost { .. } => "session_lost",
            AppError::Collaborator(_) => "collaborator",
            AppError::Config(_) => "config",
            AppError::AlreadyRunning => "already_running",
            AppError::NotAuthenticated => "not_authenticated",
            AppError::NotRunning => "not_running",
            AppError::NotPaused => "not_paused",
            AppError::NotManualMode => "not_manual_mode",
            AppError::File { .. } => "file",
            AppError::Other(_) => "other",
        }
    }

    pub fn session_lost(address: impl Into<String>) -> Self {
        AppError::SessionLost {
            address: address.into(),
        }
    }

    pub fn file(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 启动浏览器失败
    #[error("启动浏览器失败: {0}")]
    LaunchFailed(String),

    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {message}")]
    FileParseFailed { path: String, message: String },

    /// 配置值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON解析失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileParseFailed {
            path: String::new(),
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File {
            path: String::new(),
            source: err,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_loss_is_fatal() {
        assert!(AppError::session_lost("https://portal.test/login").is_fatal());
        assert!(!AppError::Verification {
            action: "flag".into(),
            attempts: 3
        }
        .is_fatal());
        assert!(!AppError::Collaborator("audit".into()).is_fatal());
    }

    #[test]
    fn lost_address_covers_both_session_loss_shapes() {
        let url = "https://portal.test/login";
        assert_eq!(AppError::session_lost(url).lost_address(), Some(url));
        let nav = AppError::Navigation(NotReached::SessionLost {
            address: url.to_string(),
        });
        assert!(nav.is_fatal());
        assert_eq!(nav.lost_address(), Some(url));
        assert_eq!(AppError::NotRunning.lost_address(), None);
    }

    #[test]
    fn control_errors_keep_their_wire_text() {
        assert!(AppError::AlreadyRunning.to_string().contains("already running"));
        assert!(AppError::NotAuthenticated
            .to_string()
            .contains("not authenticated"));
        assert_eq!(AppError::AlreadyRunning.kind(), "already_running");
    }
}
