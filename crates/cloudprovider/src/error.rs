//! 云厂商抽象层错误类型

use thiserror::Error;

/// Provider 操作错误
///
/// 调用方可以匹配 [`ProviderError::Unsupported`] 静默降级，
/// 其余错误按 transport / vendor / not-found 分类处理。
#[derive(Debug, Error)]
pub enum ProviderError {
    // ========== 能力相关错误 ==========
    /// 厂商或作用域不支持该操作
    #[error("operation {op} is not supported by provider {vendor}")]
    Unsupported { vendor: String, op: String },

    /// 资源不存在
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    // ========== 厂商 API 错误 ==========
    /// 厂商 API 返回的错误，原样透传
    #[error("vendor error {code}: {message}")]
    Vendor { code: String, message: String },

    /// HTTP 非成功状态码
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ========== 基础设施错误 ==========
    /// 网络、解析或子进程错误
    #[error("transport error: {0}")]
    Transport(String),

    /// 启动期配置错误（缺少凭证等）
    #[error("configuration error: {0}")]
    Config(String),

    /// 轮询等待超时或被取消
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

impl ProviderError {
    pub fn unsupported(vendor: impl Into<String>, op: impl Into<String>) -> Self {
        Self::Unsupported {
            vendor: vendor.into(),
            op: op.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// 实例不存在
    pub fn instance_not_found(id: impl Into<String>) -> Self {
        Self::not_found("instance", id)
    }

    pub fn vendor(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vendor {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// 网络 / 解析 / 子进程类错误，调用方可自行决定是否重试
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Http { .. }
                | Self::Request(_)
                | Self::Json(_)
                | Self::Yaml(_)
                | Self::Database(_)
        )
    }
}
