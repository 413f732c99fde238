//! 编排器错误类型
//!
//! 与策略化调用路径配合：is_retryable 决定是否进入指数退避重试，
//! 超时/取消立即终止，配置错误在构造期同步抛出。

use thiserror::Error;

/// 编排过程中可能出现的错误（配置、模型、超时、取消）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 构造期配置错误（缺 API Key、非法参数），同步抛出
    #[error("Config error: {0}")]
    Config(String),

    /// 模型调用瞬时失败（网络、5xx、上游限流），按重试策略处理
    #[error("Model error: {0}")]
    Model(String),

    /// 结构化输出失败（不合法 JSON 等，重采样可能恢复）
    #[error("Structured output error: {0}")]
    StructuredParse(String),

    /// 单步或总时限超时
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 运行被取消
    #[error("Cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// 是否可重试：仅模型瞬时错误与结构化解析错误；超时/取消不重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Model(_) | Self::StructuredParse(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestratorError::Model("503".into()).is_retryable());
        assert!(OrchestratorError::StructuredParse("bad json".into()).is_retryable());
        assert!(!OrchestratorError::Timeout("step".into()).is_retryable());
        assert!(!OrchestratorError::Cancelled.is_retryable());
        assert!(!OrchestratorError::Config("missing key".into()).is_retryable());
    }
}
