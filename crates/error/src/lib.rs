use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkgdeckError {
    #[error("包管理器未找到: {name}")]
    ManagerNotFound { name: String },

    #[error("命令执行失败: {manager} '{command}' (退出码: {exit_code})")]
    CommandFailed {
        manager: String,
        command: String,
        exit_code: i32,
    },

    #[error("命令超时")]
    CommandTimeout,

    #[error("操作失败: {manager}/{package}: {reason}")]
    OperationFailed {
        manager: String,
        package: String,
        reason: String,
    },

    #[error("解析失败: {input}")]
    ParseError { input: String },

    #[error("JSON解析失败: {message}")]
    JsonError { message: String },

    #[error("配置错误: {message}")]
    ConfigError { message: String },

    #[error("已有进行中的操作: {manager}/{package}")]
    DuplicateOperation { manager: String, package: String },

    #[error("操作已取消: {manager}/{package}")]
    OperationCanceled { manager: String, package: String },

    #[error("重试 {attempts} 次后仍然失败: {manager}/{package}: {last_error}")]
    RetryExhausted {
        manager: String,
        package: String,
        attempts: u32,
        last_error: String,
    },

    #[error("操作队列已关闭")]
    QueueClosed,
}

impl PkgdeckError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PkgdeckError::OperationCanceled { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PkgdeckError::DuplicateOperation { .. })
    }

    /// 输出中带失败标记的操作（如权限不足）重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PkgdeckError::OperationFailed { .. } | PkgdeckError::ManagerNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PkgdeckError>;
