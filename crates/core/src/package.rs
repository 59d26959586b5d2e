use chrono::{DateTime, Utc};
use pkgdeck_cache::normalize_package_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 一次探测得到的安装状态。
///
/// 探测失败（`Unknown`）与确认未安装（`NotInstalled`）是两种不同的结论，
/// 在内存中始终分开表示；序列化时输出 `{installed, version, error}` 记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StatusRecord", from = "StatusRecord")]
pub enum InstallStatus {
    Installed { version: Option<String> },
    NotInstalled,
    Unknown { error: String },
}

impl InstallStatus {
    pub fn installed(version: impl Into<String>) -> Self {
        let version = version.into();
        InstallStatus::Installed {
            version: if version.is_empty() { None } else { Some(version) },
        }
    }

    pub fn unknown(error: impl Into<String>) -> Self {
        InstallStatus::Unknown {
            error: error.into(),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, InstallStatus::Installed { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, InstallStatus::Unknown { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            InstallStatus::Installed { version } => version.as_deref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            InstallStatus::Unknown { error } => Some(error),
            _ => None,
        }
    }

    /// 状态是否已确定为 `installed`（探测失败不算）。
    pub fn confirms(&self, installed: bool) -> bool {
        match self {
            InstallStatus::Unknown { .. } => false,
            status => status.is_installed() == installed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub installed: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<InstallStatus> for StatusRecord {
    fn from(status: InstallStatus) -> Self {
        match status {
            InstallStatus::Installed { version } => StatusRecord {
                installed: true,
                version,
                error: None,
            },
            InstallStatus::NotInstalled => StatusRecord {
                installed: false,
                version: None,
                error: None,
            },
            InstallStatus::Unknown { error } => StatusRecord {
                installed: false,
                version: None,
                error: Some(error),
            },
        }
    }
}

impl From<StatusRecord> for InstallStatus {
    fn from(record: StatusRecord) -> Self {
        if record.installed {
            return InstallStatus::Installed {
                version: record.version,
            };
        }
        match record.error {
            Some(error) => InstallStatus::Unknown { error },
            None => InstallStatus::NotInstalled,
        }
    }
}

/// (管理器, 包 ID) 的规范化键，包 ID 规则与状态缓存一致。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageKey {
    pub manager: String,
    pub package: String,
}

impl PackageKey {
    pub fn new(manager: &str, package: &str) -> Self {
        Self {
            manager: manager.to_string(),
            package: normalize_package_id(package),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manager, self.package)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Install,
    Uninstall,
}

impl Operation {
    /// 操作完成后期望的安装状态
    pub fn expected_installed(&self) -> bool {
        matches!(self, Operation::Install)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install => write!(f, "install"),
            Operation::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// 结束的操作会立即移出队列，快照里只会出现这两种状态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
}

/// 队列中一个操作的快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub manager: String,
    pub operation: Operation,
    pub target: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub next_backoff_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// 复查确认了期望状态
    Confirmed,
    /// 命令报告成功，但复查次数用尽仍未看到期望状态
    Diverged,
}

/// 一次安装/卸载的最终结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
    pub final_status: InstallStatus,
    pub verification: Verification,
}

impl OperationOutcome {
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Confirmed
    }
}
