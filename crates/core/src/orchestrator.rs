use crate::manager::PackageManager;
use crate::package::{InstallStatus, Operation, OperationOutcome, Verification};
use crate::prober::StatusProber;
use pkgdeck_error::{PkgdeckError, Result};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 10;
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_VERIFY_ATTEMPTS,
            delay: DEFAULT_VERIFY_DELAY,
        }
    }
}

/// 执行一次安装/卸载，并通过强制刷新的探测确认结果。
pub struct Orchestrator {
    prober: Arc<StatusProber>,
    config: VerifyConfig,
}

impl Orchestrator {
    pub fn new(prober: Arc<StatusProber>, config: VerifyConfig) -> Self {
        Self { prober, config }
    }

    pub async fn run(
        &self,
        manager: &dyn PackageManager,
        operation: Operation,
        package: &str,
    ) -> Result<OperationOutcome> {
        info!("{} {} {}", manager.name(), operation, package);

        let output = manager.apply(operation, package).await?;

        if let Some(line) = manager.parser().detect_failure(&output.text) {
            warn!("{} {} {} 输出包含失败标记: {}", manager.name(), operation, package, line);
            return Err(PkgdeckError::OperationFailed {
                manager: manager.name().to_string(),
                package: package.to_string(),
                reason: line,
            });
        }

        if !manager.parser().is_success_exit(output.exit_code) {
            return Err(PkgdeckError::CommandFailed {
                manager: manager.name().to_string(),
                command: format!("{} {}", operation, package),
                exit_code: output.exit_code,
            });
        }

        let expected = operation.expected_installed();
        let attempts = self.config.max_attempts.max(1);
        let mut last = InstallStatus::unknown("尚未复查");

        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(self.config.delay).await;
            }

            last = self.prober.probe(manager, package, true).await;
            if last.confirms(expected) {
                info!(
                    "{} {} {} 已确认 (第 {} 次复查)",
                    manager.name(),
                    operation,
                    package,
                    attempt
                );
                return Ok(OperationOutcome {
                    success: true,
                    message: format!("{} {} 已完成", operation, package),
                    final_status: last,
                    verification: Verification::Confirmed,
                });
            }

            debug!(
                "{} 复查 {} 第 {}/{} 次: 尚未达到期望状态",
                manager.name(),
                package,
                attempt,
                attempts
            );
        }

        warn!(
            "{} {} {} 命令已成功，但 {} 次复查后状态仍未确认",
            manager.name(),
            operation,
            package,
            attempts
        );

        Ok(OperationOutcome {
            success: true,
            message: format!(
                "{} {} 命令已成功，但 {} 次复查后状态仍未确认",
                operation, package, attempts
            ),
            final_status: last,
            verification: Verification::Diverged,
        })
    }
}
