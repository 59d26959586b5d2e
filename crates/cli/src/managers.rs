use pkgdeck_choco::ChocoManager;
use pkgdeck_core::{CommandRunner, CommandTimeouts, PackageManager};
use pkgdeck_winget::WingetManager;
use std::sync::Arc;

pub const MANAGER_NAMES: [&str; 2] = ["winget", "choco"];

/// 创建包管理器实例
///
/// # 参数
///
/// * `name` - 包管理器名称
/// * `runner` - 外部命令执行器
/// * `timeouts` - 查询与变更命令的超时
pub fn create_manager(
    name: &str,
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
) -> Option<Arc<dyn PackageManager>> {
    match name {
        "winget" => Some(Arc::new(WingetManager::new(runner, timeouts))),
        "choco" => Some(Arc::new(ChocoManager::new(runner, timeouts))),
        _ => None,
    }
}

pub fn create_all_managers(
    runner: Arc<dyn CommandRunner>,
    timeouts: CommandTimeouts,
) -> Vec<Arc<dyn PackageManager>> {
    MANAGER_NAMES
        .iter()
        .filter_map(|name| create_manager(name, runner.clone(), timeouts))
        .collect()
}
