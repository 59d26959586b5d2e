use async_trait::async_trait;
use pkgdeck_core::{
    interpret_probe, CommandOutput, CommandRunner, CommandTimeouts, InstallStatus, OutputParser,
    PackageManager,
};
use pkgdeck_error::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod parser;

pub use parser::WingetParser;

const PROGRAM: &str = "winget";

pub struct WingetManager {
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
    parser: WingetParser,
}

impl WingetManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: CommandTimeouts) -> Self {
        Self {
            runner,
            timeouts,
            parser: WingetParser,
        }
    }

    /// `--exact` 对 ID 区分大小写，这里不用它；`--id` 的模糊匹配由
    /// `WingetParser` 收窄为不区分大小写的精确匹配。
    fn list_args(package: &str) -> Vec<&str> {
        vec![
            "list",
            "--id",
            package,
            "--accept-source-agreements",
            "--disable-interactivity",
        ]
    }
}

#[async_trait]
impl PackageManager for WingetManager {
    fn name(&self) -> &str {
        "winget"
    }

    fn parser(&self) -> &dyn OutputParser {
        &self.parser
    }

    async fn check_available(&self) -> Result<bool> {
        match self
            .runner
            .run(PROGRAM, &["--version"], self.timeouts.probe)
            .await
        {
            Ok(output) => Ok(output.success()),
            Err(err) => {
                debug!("winget 不可用: {}", err);
                Ok(false)
            }
        }
    }

    async fn query_status(&self, package: &str) -> Result<InstallStatus> {
        let args = Self::list_args(package);
        let output = self.runner.run(PROGRAM, &args, self.timeouts.probe).await?;
        let status = interpret_probe(self.name(), &args.join(" "), &self.parser, package, &output)?;
        debug!("winget {} 状态: {:?}", package, status);
        Ok(status)
    }

    async fn install(&self, package: &str) -> Result<CommandOutput> {
        info!("winget install {}", package);
        self.runner
            .run(
                PROGRAM,
                &[
                    "install",
                    "--id",
                    package,
                    "--silent",
                    "--accept-package-agreements",
                    "--accept-source-agreements",
                    "--disable-interactivity",
                ],
                self.timeouts.mutate,
            )
            .await
    }

    async fn uninstall(&self, package: &str) -> Result<CommandOutput> {
        warn!("winget uninstall {}", package);
        self.runner
            .run(
                PROGRAM,
                &[
                    "uninstall",
                    "--id",
                    package,
                    "--silent",
                    "--disable-interactivity",
                ],
                self.timeouts.mutate,
            )
            .await
    }
}
