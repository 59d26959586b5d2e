use crate::executor::CommandOutput;
use crate::package::{InstallStatus, Operation};
use crate::parser::OutputParser;
use async_trait::async_trait;
use pkgdeck_error::{PkgdeckError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// 按名称索引的包管理器集合
pub type ManagerRegistry = HashMap<String, Arc<dyn PackageManager>>;

#[async_trait]
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn parser(&self) -> &dyn OutputParser;

    async fn check_available(&self) -> Result<bool>;

    /// 执行一次探测命令并解析结果，不经过缓存。
    async fn query_status(&self, package: &str) -> Result<InstallStatus>;

    async fn install(&self, package: &str) -> Result<CommandOutput>;

    async fn uninstall(&self, package: &str) -> Result<CommandOutput>;

    async fn apply(&self, operation: Operation, package: &str) -> Result<CommandOutput> {
        match operation {
            Operation::Install => self.install(package).await,
            Operation::Uninstall => self.uninstall(package).await,
        }
    }

    fn cache_key(&self) -> &str {
        self.name()
    }
}

/// 把探测命令的输出转换为安装状态。
///
/// 带“未找到”标记的输出即使退出码非零也视为未安装；
/// 其余非零退出码按命令失败处理。
pub fn interpret_probe(
    manager: &str,
    command: &str,
    parser: &dyn OutputParser,
    package: &str,
    output: &CommandOutput,
) -> Result<InstallStatus> {
    if parser.is_not_found(&output.text) {
        return Ok(InstallStatus::NotInstalled);
    }

    if !output.success() {
        return Err(PkgdeckError::CommandFailed {
            manager: manager.to_string(),
            command: command.to_string(),
            exit_code: output.exit_code,
        });
    }

    Ok(parser.parse_status(package, &output.text))
}
