use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pkgdeck_cli::logging::{self, LogFormat};
use pkgdeck_cli::managers::create_all_managers;
use pkgdeck_cli::manifest::{plan, Manifest, SyncAction};
use pkgdeck_cli::output::{status_badge, OperationReport, EXIT_CANCELED, EXIT_ERROR, EXIT_OK};
use pkgdeck_core::{
    BulkProgress, CommandRunner, Operation, OperationHandle, ServiceContext, Settings,
    SystemRunner,
};
use pkgdeck_error::PkgdeckError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "pkgdeck", version = env!("CARGO_PKG_VERSION"), about = "Windows 包管理器状态协调工具")]
struct Cli {
    #[arg(short, long, global = true)]
    json: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// 日志格式
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// 配置文件路径（默认 <config_dir>/pkgdeck/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出包管理器及其可用性
    Managers,
    /// 查询单个包的安装状态
    Status {
        /// 包 ID
        package: String,
        /// 指定包管理器
        #[arg(short, long)]
        manager: String,
        /// 跳过缓存
        #[arg(long)]
        refresh: bool,
    },
    /// 批量查询安装状态
    Bulk {
        /// 包 ID 列表
        #[arg(required = true)]
        packages: Vec<String>,
        /// 指定包管理器
        #[arg(short, long)]
        manager: String,
        /// 跳过缓存
        #[arg(long)]
        refresh: bool,
    },
    /// 安装包
    Install {
        /// 包 ID
        package: String,
        /// 指定包管理器
        #[arg(short, long)]
        manager: String,
    },
    /// 卸载包
    Uninstall {
        /// 包 ID
        package: String,
        /// 指定包管理器
        #[arg(short, long)]
        manager: String,
    },
    /// 按清单协调期望状态
    Sync {
        /// 清单文件（JSON）
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_format)?;

    let settings = Settings::load(cli.config.as_deref())
        .await
        .context("加载配置失败")?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let managers = create_all_managers(runner, settings.command_timeouts());
    let context = Arc::new(ServiceContext::new(&settings, managers));

    let code = match cli.command {
        Commands::Managers => cmd_managers(&context, cli.json).await?,
        Commands::Status {
            package,
            manager,
            refresh,
        } => cmd_status(&context, &manager, &package, refresh, cli.json).await?,
        Commands::Bulk {
            packages,
            manager,
            refresh,
        } => cmd_bulk(&context, &manager, &packages, refresh, cli.json).await?,
        Commands::Install { package, manager } => {
            cmd_operation(&context, &manager, &package, Operation::Install, cli.json).await?
        }
        Commands::Uninstall { package, manager } => {
            cmd_operation(&context, &manager, &package, Operation::Uninstall, cli.json).await?
        }
        Commands::Sync { manifest } => cmd_sync(context.clone(), &manifest, cli.json).await?,
    };

    if code != EXIT_OK {
        std::process::exit(code);
    }
    Ok(())
}

async fn cmd_managers(context: &ServiceContext, json: bool) -> Result<i32> {
    let mut results = Vec::new();
    for name in context.manager_names() {
        let manager = context.manager(&name)?;
        let available = manager.check_available().await.unwrap_or(false);
        results.push((name, available));
    }

    if json {
        let output: Vec<_> = results
            .iter()
            .map(|(name, available)| serde_json::json!({ "name": name, "available": available }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (name, available) in &results {
            let badge = if *available {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {}", badge, name.bright_white());
        }
    }

    Ok(EXIT_OK)
}

async fn cmd_status(
    context: &ServiceContext,
    manager: &str,
    package: &str,
    refresh: bool,
    json: bool,
) -> Result<i32> {
    let status = context
        .get_status(manager, package, refresh)
        .await
        .with_context(|| format!("查询 {} 失败", package))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "manager": manager, "package": package, "status": status })
        );
    } else {
        println!(
            "{} {} {}",
            status_badge(&status),
            package.bright_white(),
            format!("({})", manager).dimmed()
        );
    }

    Ok(if status.is_unknown() { EXIT_ERROR } else { EXIT_OK })
}

async fn cmd_bulk(
    context: &ServiceContext,
    manager: &str,
    packages: &[String],
    refresh: bool,
    json: bool,
) -> Result<i32> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<BulkProgress>();
    let printer = tokio::spawn(async move {
        while let Some(progress) = receiver.recv().await {
            eprintln!(
                "{} {} {}",
                format!("[{}/{}]", progress.completed, progress.total).dimmed(),
                progress.app_id,
                status_badge(&progress.status)
            );
        }
    });

    let result = context
        .get_bulk_status(manager, packages, refresh, (!json).then_some(&sender))
        .await
        .context("批量查询失败")?;
    drop(sender);
    if let Err(err) = printer.await {
        debug!("进度输出任务异常结束: {}", err);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        for entry in &result.results {
            println!("  {} {}", status_badge(&entry.status), entry.app_id.bright_white());
        }
        for skipped in &result.skipped {
            println!("  {} {}", "… 未完成".dimmed(), skipped.bright_white());
        }
        if let Some(error) = &result.error {
            eprintln!("{}", format!("警告: {}", error).bright_yellow());
        }
    }

    Ok(if result.success { EXIT_OK } else { EXIT_ERROR })
}

async fn cmd_operation(
    context: &ServiceContext,
    manager: &str,
    package: &str,
    operation: Operation,
    json: bool,
) -> Result<i32> {
    let handle = context
        .enqueue_operation(manager, package, operation)
        .await
        .with_context(|| format!("{} {} 入队失败", operation, package))?;

    if !json {
        println!(
            "{} {} ({})...",
            operation,
            package.bright_white(),
            manager.bright_cyan()
        );
    }

    let result = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，取消 {}/{}", manager, package);
            context.cancel_operation(manager, package).await;
            Err(PkgdeckError::OperationCanceled {
                manager: manager.to_string(),
                package: package.to_string(),
            })
        }
    };

    let report = OperationReport::from_result(&result);
    if json {
        println!("{}", report.to_json(manager, package));
    } else {
        println!("{}", report.badge());
    }

    Ok(report.exit_code())
}

async fn cmd_sync(context: Arc<ServiceContext>, path: &Path, json: bool) -> Result<i32> {
    let manifest = Manifest::load(path).await?;
    let mut outputs = Vec::new();
    let mut handles: Vec<OperationHandle> = Vec::new();
    let mut code = EXIT_OK;

    for (manager, entries) in manifest.by_manager() {
        let ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();
        let result = match context.get_bulk_status(manager, &ids, false, None).await {
            Ok(result) => result,
            Err(err) => {
                for entry in &entries {
                    outputs.push(sync_line(manager, &entry.id, "failed", &err.to_string()));
                }
                code = EXIT_ERROR;
                continue;
            }
        };

        for entry in entries {
            let action = match result.status_of(&entry.id) {
                Some(status) => plan(entry.installed, status),
                None => SyncAction::Skip("批量查询超时".to_string()),
            };

            match action {
                SyncAction::InSync => {
                    outputs.push(sync_line(manager, &entry.id, "in_sync", ""));
                }
                SyncAction::Skip(reason) => {
                    outputs.push(sync_line(manager, &entry.id, "skipped", &reason));
                    code = EXIT_ERROR;
                }
                SyncAction::Apply(operation) => {
                    match context.enqueue_operation(manager, &entry.id, operation).await {
                        Ok(handle) => handles.push(handle),
                        Err(err) => {
                            outputs.push(sync_line(manager, &entry.id, "failed", &err.to_string()));
                            code = EXIT_ERROR;
                        }
                    }
                }
            }
        }
    }

    let keys: Vec<(String, String)> = handles
        .iter()
        .map(|handle| (handle.manager.clone(), handle.package.clone()))
        .collect();
    let canceller = {
        let context = context.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，取消 {} 个待同步操作", keys.len());
                for (manager, package) in keys {
                    context.cancel_operation(&manager, &package).await;
                }
            }
        })
    };

    for handle in handles {
        let manager = handle.manager.clone();
        let package = handle.package.clone();
        if !json {
            println!(
                "{} {} ({})...",
                handle.operation,
                package.bright_white(),
                manager.bright_cyan()
            );
        }

        let report = OperationReport::from_result(&handle.wait().await);
        if report.exit_code() != EXIT_OK && code != EXIT_CANCELED {
            code = report.exit_code();
        }
        if json {
            outputs.push(report.to_json(&manager, &package));
        } else {
            println!("  {}", report.badge());
        }
    }
    canceller.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        for line in &outputs {
            let result = line["result"].as_str().unwrap_or_default();
            let package = line["package"].as_str().unwrap_or_default();
            let detail = line["detail"].as_str().unwrap_or_default();
            let badge = match result {
                "in_sync" => "= 已一致".bright_green(),
                "skipped" => format!("? 跳过: {}", detail).bright_yellow(),
                _ => format!("✗ 失败: {}", detail).bright_red(),
            };
            println!("  {} {}", badge, package.bright_white());
        }
    }

    Ok(code)
}

fn sync_line(manager: &str, package: &str, result: &str, detail: &str) -> serde_json::Value {
    serde_json::json!({
        "manager": manager,
        "package": package,
        "result": result,
        "detail": detail,
    })
}
