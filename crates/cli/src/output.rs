use colored::*;
use pkgdeck_core::{InstallStatus, OperationOutcome, Verification};
use pkgdeck_error::Result;
use serde_json::{json, Value};

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_DIVERGED: i32 = 3;
pub const EXIT_CANCELED: i32 = 130;

pub fn status_label(status: &InstallStatus) -> String {
    match status {
        InstallStatus::Installed { version: Some(version) } => format!("已安装 {}", version),
        InstallStatus::Installed { version: None } => "已安装".to_string(),
        InstallStatus::NotInstalled => "未安装".to_string(),
        InstallStatus::Unknown { error } => format!("探测失败: {}", error),
    }
}

pub fn status_badge(status: &InstallStatus) -> ColoredString {
    let label = status_label(status);
    match status {
        InstallStatus::Installed { .. } => format!("✓ {}", label).bright_green(),
        InstallStatus::NotInstalled => format!("○ {}", label).dimmed(),
        InstallStatus::Unknown { .. } => format!("? {}", label).bright_yellow(),
    }
}

/// 安装/卸载操作在终端上的四种结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationReport {
    Confirmed { status: InstallStatus },
    Diverged { message: String, status: InstallStatus },
    Failed { reason: String },
    Canceled,
}

impl OperationReport {
    pub fn from_result(result: &Result<OperationOutcome>) -> Self {
        match result {
            Ok(outcome) => match outcome.verification {
                Verification::Confirmed => OperationReport::Confirmed {
                    status: outcome.final_status.clone(),
                },
                Verification::Diverged => OperationReport::Diverged {
                    message: outcome.message.clone(),
                    status: outcome.final_status.clone(),
                },
            },
            Err(err) if err.is_cancellation() => OperationReport::Canceled,
            Err(err) => OperationReport::Failed {
                reason: err.to_string(),
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            OperationReport::Confirmed { .. } => EXIT_OK,
            OperationReport::Diverged { .. } => EXIT_DIVERGED,
            OperationReport::Failed { .. } => EXIT_ERROR,
            OperationReport::Canceled => EXIT_CANCELED,
        }
    }

    pub fn badge(&self) -> ColoredString {
        match self {
            OperationReport::Confirmed { status } => {
                format!("✓ 已完成 ({})", status_label(status)).bright_green()
            }
            OperationReport::Diverged { message, .. } => format!("⚠ {}", message).bright_yellow(),
            OperationReport::Failed { reason } => format!("✗ 失败: {}", reason).bright_red(),
            OperationReport::Canceled => "⊘ 已取消".bright_magenta(),
        }
    }

    pub fn to_json(&self, manager: &str, package: &str) -> Value {
        match self {
            OperationReport::Confirmed { status } => json!({
                "manager": manager,
                "package": package,
                "result": "confirmed",
                "status": status,
            }),
            OperationReport::Diverged { message, status } => json!({
                "manager": manager,
                "package": package,
                "result": "diverged",
                "message": message,
                "status": status,
            }),
            OperationReport::Failed { reason } => json!({
                "manager": manager,
                "package": package,
                "result": "failed",
                "error": reason,
            }),
            OperationReport::Canceled => json!({
                "manager": manager,
                "package": package,
                "result": "canceled",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgdeck_error::PkgdeckError;

    fn outcome(verification: Verification) -> OperationOutcome {
        OperationOutcome {
            success: true,
            message: "install Foo.Bar 命令已成功，但 10 次复查后状态仍未确认".to_string(),
            final_status: InstallStatus::installed("2.0.0"),
            verification,
        }
    }

    #[test]
    fn test_status_labels_are_distinct() {
        assert_eq!(status_label(&InstallStatus::installed("1.2.3")), "已安装 1.2.3");
        assert_eq!(status_label(&InstallStatus::NotInstalled), "未安装");
        assert_eq!(status_label(&InstallStatus::unknown("超时")), "探测失败: 超时");
    }

    #[test]
    fn test_reports_keep_outcomes_apart() {
        let confirmed = OperationReport::from_result(&Ok(outcome(Verification::Confirmed)));
        let diverged = OperationReport::from_result(&Ok(outcome(Verification::Diverged)));
        let canceled = OperationReport::from_result(&Err(PkgdeckError::OperationCanceled {
            manager: "winget".to_string(),
            package: "Foo.Bar".to_string(),
        }));
        let failed = OperationReport::from_result(&Err(PkgdeckError::QueueClosed));

        assert_eq!(confirmed.exit_code(), EXIT_OK);
        assert_eq!(diverged.exit_code(), EXIT_DIVERGED);
        assert_eq!(canceled, OperationReport::Canceled);
        assert_eq!(failed.exit_code(), EXIT_ERROR);
    }

    #[test]
    fn test_json_report_shape() {
        let report = OperationReport::from_result(&Ok(outcome(Verification::Confirmed)));
        let value = report.to_json("winget", "Foo.Bar");

        assert_eq!(value["result"], "confirmed");
        assert_eq!(value["status"]["installed"], true);
        assert_eq!(value["status"]["version"], "2.0.0");
    }
}
