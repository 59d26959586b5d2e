use async_trait::async_trait;
use pkgdeck_error::{PkgdeckError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::parser::clean_output;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// 探测命令与安装/卸载命令各自的超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub probe: Duration,
    pub mutate: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            probe: PROBE_TIMEOUT,
            mutate: COMMAND_TIMEOUT,
        }
    }
}

/// 外部命令的退出码和合并后的输出（stdout 在前，stderr 在后）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub text: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, text: impl Into<String>) -> Self {
        Self {
            exit_code,
            text: text.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> Result<CommandOutput>;
}

/// 通过 `tokio::process` 执行外部命令。
///
/// 子进程设置了 `kill_on_drop`：超时或调用方放弃（例如取消操作）时，
/// future 被丢弃，子进程随之被终止。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> Result<CommandOutput> {
        debug!("执行 {} 命令: {}", program, args.join(" "));

        let output = timeout(
            limit,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| PkgdeckError::CommandTimeout)?
        .map_err(|err| {
            warn!("无法启动 {}: {}", program, err);
            PkgdeckError::CommandFailed {
                manager: program.to_string(),
                command: args.join(" "),
                exit_code: -1,
            }
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            text: clean_output(&text),
        })
    }
}
