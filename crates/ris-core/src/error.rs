//! 错误定义模块

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RIS工作流引擎统一错误类型
#[derive(Error, Debug)]
pub enum RisError {
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效状态转换: 从 {from} 到 {to}")]
    InvalidTransition { from: String, to: String },

    #[error("权限错误: {0}")]
    Unauthorized(String),

    #[error("报告不可用: {0}")]
    ReportNotAvailable(String),

    #[error("外部协作方超时: {0}")]
    CollaboratorTimeout(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("操作已取消: {0}")]
    Cancelled(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 错误分类
///
/// 批量操作结果中每一项携带的可序列化错误种类，
/// 由 `RisError` 映射得到。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    Unauthorized,
    ReportNotAvailable,
    ExternalCollaboratorTimeout,
    Validation,
    Cancelled,
    Internal,
}

impl From<&RisError> for ErrorKind {
    fn from(err: &RisError) -> Self {
        match err {
            RisError::NotFound(_) => ErrorKind::NotFound,
            RisError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            RisError::Unauthorized(_) => ErrorKind::Unauthorized,
            RisError::ReportNotAvailable(_) => ErrorKind::ReportNotAvailable,
            RisError::CollaboratorTimeout(_) => ErrorKind::ExternalCollaboratorTimeout,
            RisError::Validation(_) => ErrorKind::Validation,
            RisError::Cancelled(_) => ErrorKind::Cancelled,
            RisError::Serialization(_) | RisError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// RIS工作流引擎统一结果类型
pub type Result<T> = std::result::Result<T, RisError>;
