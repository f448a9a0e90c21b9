//! 节点代理错误类型

use thiserror::Error;

/// sidecar 核心错误
#[derive(Debug, Error)]
pub enum SidecarError {
    // ========== 配置与状态错误 ==========
    /// 启动期配置错误或调用顺序错误
    #[error("configuration error: {0}")]
    Config(String),

    // ========== 中心服务错误 ==========
    /// 设备认证失败，携带中心返回的业务码
    #[error("auth failed ({code}): {message}")]
    Auth { code: i32, message: String },

    /// HTTP 非成功状态码
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 中心返回的非零业务码
    #[error("{context} failed: code={code}, message={message}")]
    Coordinator {
        context: String,
        code: i32,
        message: String,
    },

    // ========== 基础设施错误 ==========
    /// 网络、解析或子进程错误
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ========== 本地产物错误 ==========
    /// 模板缺少字段或渲染失败
    #[error("template {template}: missing or invalid field '{field}'")]
    Template { template: String, field: String },

    /// 证书生成、解析或落盘失败
    #[error("certificate error: {0}")]
    Certificate(String),

    /// RADIUS 报文错误
    #[error("RADIUS error: {0}")]
    Radius(String),
}

pub type Result<T, E = SidecarError> = std::result::Result<T, E>;

impl SidecarError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn coordinator(context: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::Coordinator {
            context: context.into(),
            code,
            message: message.into(),
        }
    }

    pub fn template(template: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            field: field.into(),
        }
    }

    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate(message.into())
    }

    pub fn radius(message: impl Into<String>) -> Self {
        Self::Radius(message.into())
    }

    /// 网络类错误，调用方可以选择重试
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http { .. } | Self::Request(_) | Self::Json(_)
        )
    }
}
