use crate::manager::PackageManager;
use crate::package::InstallStatus;
use pkgdeck_cache::StatusCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 带缓存的单包状态探测。
///
/// 命令失败时返回 `InstallStatus::Unknown` 并同样写入缓存，
/// 避免在过期窗口内反复调用一个坏掉的命令。
pub struct StatusProber {
    cache: Arc<StatusCache<InstallStatus>>,
}

impl StatusProber {
    pub fn new(cache: Arc<StatusCache<InstallStatus>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<StatusCache<InstallStatus>> {
        &self.cache
    }

    pub async fn probe(
        &self,
        manager: &dyn PackageManager,
        package: &str,
        force_refresh: bool,
    ) -> InstallStatus {
        let max_age = self.cache.config().status_ttl;
        self.probe_within(manager, package, force_refresh, max_age)
            .await
    }

    pub async fn probe_within(
        &self,
        manager: &dyn PackageManager,
        package: &str,
        force_refresh: bool,
        max_age: Duration,
    ) -> InstallStatus {
        let cache_key = manager.cache_key();

        if !force_refresh {
            if let Some(entry) = self.cache.get(cache_key, package, max_age).await {
                debug!(
                    "使用缓存的 {} 状态: {} (写入于 {})",
                    manager.name(),
                    package,
                    entry.cached_at.to_rfc3339()
                );
                return entry.data;
            }
        }

        let generation = self.cache.generation(cache_key).await;
        let status = match manager.query_status(package).await {
            Ok(status) => status,
            Err(err) => {
                warn!("{} 探测 {} 失败: {}", manager.name(), package, err);
                InstallStatus::unknown(err.to_string())
            }
        };

        if !self
            .cache
            .set_if_current(cache_key, package, status.clone(), generation)
            .await
        {
            debug!("{} 缓存已在探测期间失效，未写入 {}", manager.name(), package);
        }

        status
    }
}
