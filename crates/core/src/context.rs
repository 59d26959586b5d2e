use crate::config::Settings;
use crate::manager::{ManagerRegistry, PackageManager};
use crate::orchestrator::Orchestrator;
use crate::package::{InstallStatus, Job, Operation};
use crate::prober::StatusProber;
use crate::queue::{OperationHandle, OperationQueue};
use crate::reconciler::{BulkProgress, BulkReconciler, BulkResult};
use pkgdeck_cache::StatusCache;
use pkgdeck_error::{PkgdeckError, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// 进程级服务对象：启动时构建一次，由传输层持有并调用。
pub struct ServiceContext {
    managers: Arc<ManagerRegistry>,
    cache: Arc<StatusCache<InstallStatus>>,
    prober: Arc<StatusProber>,
    reconciler: BulkReconciler,
    queue: OperationQueue,
}

impl ServiceContext {
    /// 必须在 tokio 运行时内调用（会启动队列 worker）。
    pub fn new(settings: &Settings, managers: Vec<Arc<dyn PackageManager>>) -> Self {
        let managers: Arc<ManagerRegistry> = Arc::new(
            managers
                .into_iter()
                .map(|manager| (manager.name().to_string(), manager))
                .collect(),
        );
        let cache = Arc::new(StatusCache::new_with_config(settings.cache_config()));
        let prober = Arc::new(StatusProber::new(cache.clone()));
        let reconciler = BulkReconciler::new(prober.clone(), settings.bulk_config());
        let orchestrator = Arc::new(Orchestrator::new(prober.clone(), settings.verify_config()));
        let queue = OperationQueue::new(
            settings.queue_config(),
            managers.clone(),
            orchestrator,
            cache.clone(),
        );

        Self {
            managers,
            cache,
            prober,
            reconciler,
            queue,
        }
    }

    pub fn manager(&self, name: &str) -> Result<Arc<dyn PackageManager>> {
        self.managers
            .get(name)
            .cloned()
            .ok_or_else(|| PkgdeckError::ManagerNotFound {
                name: name.to_string(),
            })
    }

    pub fn manager_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn cache(&self) -> &Arc<StatusCache<InstallStatus>> {
        &self.cache
    }

    pub async fn get_status(
        &self,
        manager: &str,
        package: &str,
        force_refresh: bool,
    ) -> Result<InstallStatus> {
        let manager = self.manager(manager)?;
        Ok(self
            .prober
            .probe(manager.as_ref(), package, force_refresh)
            .await)
    }

    pub async fn get_bulk_status(
        &self,
        manager: &str,
        packages: &[String],
        force_refresh: bool,
        progress: Option<&UnboundedSender<BulkProgress>>,
    ) -> Result<BulkResult> {
        let manager = self.manager(manager)?;

        let removed = self.cache.clean(self.cache.config().bulk_ttl).await;
        if removed > 0 {
            debug!(
                "批量检查前清理过期缓存 {} 条，剩余 {} 条",
                removed,
                self.cache.len().await
            );
        }

        Ok(self
            .reconciler
            .check(manager, packages, force_refresh, progress)
            .await)
    }

    pub async fn enqueue_operation(
        &self,
        manager: &str,
        package: &str,
        operation: Operation,
    ) -> Result<OperationHandle> {
        self.queue.enqueue(manager, package, operation).await
    }

    pub async fn cancel_operation(&self, manager: &str, package: &str) -> bool {
        self.queue.stop(manager, package).await
    }

    pub async fn operations(&self) -> Vec<Job> {
        self.queue.snapshot().await
    }
}
