use async_trait::async_trait;
use pkgdeck_core::{
    interpret_probe, CommandOutput, CommandRunner, CommandTimeouts, InstallStatus, OutputParser,
    PackageManager,
};
use pkgdeck_error::{PkgdeckError, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

mod parser;

pub use parser::{parse_major_version, ChocoParser};

const PROGRAM: &str = "choco";

/// v2 起 `list` 只列本地包；更早的版本需要 `--local-only`，否则查询的是远程源。
const LOCAL_LIST_MAJOR: u32 = 2;

pub struct ChocoManager {
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
    parser: ChocoParser,
    major_version: OnceCell<u32>,
}

impl ChocoManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: CommandTimeouts) -> Self {
        Self {
            runner,
            timeouts,
            parser: ChocoParser,
            major_version: OnceCell::new(),
        }
    }

    /// 首次成功后缓存主版本号。
    async fn major_version(&self) -> Result<u32> {
        self.major_version
            .get_or_try_init(|| self.detect_major_version())
            .await
            .copied()
    }

    async fn detect_major_version(&self) -> Result<u32> {
        let output = self
            .runner
            .run(PROGRAM, &["--version"], self.timeouts.probe)
            .await?;
        if !output.success() {
            return Err(PkgdeckError::CommandFailed {
                manager: "choco".to_string(),
                command: "--version".to_string(),
                exit_code: output.exit_code,
            });
        }

        let major = parse_major_version(&output.text).ok_or_else(|| PkgdeckError::ParseError {
            input: output.text.clone(),
        })?;
        debug!("choco 主版本: {}", major);
        Ok(major)
    }

    fn list_args(package: &str, major: u32) -> Vec<&str> {
        let mut args = vec!["list", package, "--exact", "--limit-output"];
        if major < LOCAL_LIST_MAJOR {
            args.push("--local-only");
        }
        args
    }
}

#[async_trait]
impl PackageManager for ChocoManager {
    fn name(&self) -> &str {
        "choco"
    }

    fn parser(&self) -> &dyn OutputParser {
        &self.parser
    }

    async fn check_available(&self) -> Result<bool> {
        match self.major_version().await {
            Ok(_) => Ok(true),
            Err(err) => {
                debug!("choco 不可用: {}", err);
                Ok(false)
            }
        }
    }

    async fn query_status(&self, package: &str) -> Result<InstallStatus> {
        let args = Self::list_args(package, self.major_version().await?);
        let output = self.runner.run(PROGRAM, &args, self.timeouts.probe).await?;
        let status = interpret_probe(self.name(), &args.join(" "), &self.parser, package, &output)?;
        debug!("choco {} 状态: {:?}", package, status);
        Ok(status)
    }

    async fn install(&self, package: &str) -> Result<CommandOutput> {
        info!("choco install {}", package);
        self.runner
            .run(
                PROGRAM,
                &["install", package, "-y", "--no-progress"],
                self.timeouts.mutate,
            )
            .await
    }

    async fn uninstall(&self, package: &str) -> Result<CommandOutput> {
        warn!("choco uninstall {}", package);
        self.runner
            .run(PROGRAM, &["uninstall", package, "-y"], self.timeouts.mutate)
            .await
    }
}
