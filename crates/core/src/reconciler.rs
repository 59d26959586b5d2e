use crate::manager::PackageManager;
use crate::package::InstallStatus;
use crate::prober::StatusProber;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct BulkConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub timeout: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            timeout: DEFAULT_BULK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    pub app_id: String,
    pub status: InstallStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkError {
    pub app_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgress {
    pub completed: usize,
    pub total: usize,
    pub app_id: String,
    pub status: InstallStatus,
}

/// 批量检查结果。单个探测失败只记录在 `errors` 中；
/// 只有超时会让 `success` 为 false，此时已完成的结果照常保留。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub success: bool,
    pub results: Vec<BulkEntry>,
    pub errors: Vec<BulkError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl BulkResult {
    fn new() -> Self {
        Self {
            success: true,
            results: Vec::new(),
            errors: Vec::new(),
            error: None,
            skipped: Vec::new(),
        }
    }

    fn record(&mut self, app_id: String, status: InstallStatus) {
        if let Some(error) = status.error() {
            self.errors.push(BulkError {
                app_id: app_id.clone(),
                error: error.to_string(),
            });
        }
        self.results.push(BulkEntry { app_id, status });
    }

    pub fn status_of(&self, app_id: &str) -> Option<&InstallStatus> {
        self.results
            .iter()
            .find(|entry| entry.app_id.eq_ignore_ascii_case(app_id))
            .map(|entry| &entry.status)
    }
}

pub struct BulkReconciler {
    prober: Arc<StatusProber>,
    config: BulkConfig,
}

impl BulkReconciler {
    pub fn new(prober: Arc<StatusProber>, config: BulkConfig) -> Self {
        Self { prober, config }
    }

    /// 分批探测 `packages`。每批内并发探测，批次之间插入固定间隔；
    /// 累计耗时超过上限时中止剩余探测并返回部分结果。
    pub async fn check(
        &self,
        manager: Arc<dyn PackageManager>,
        packages: &[String],
        force_refresh: bool,
        progress: Option<&UnboundedSender<BulkProgress>>,
    ) -> BulkResult {
        let total = packages.len();
        let deadline = Instant::now() + self.config.timeout;
        let max_age = self.prober.cache().config().bulk_ttl;
        let batch_size = self.config.batch_size.max(1);
        let mut result = BulkResult::new();

        info!("{} 批量检查 {} 个包", manager.name(), total);

        for (index, batch) in packages.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                sleep(self.config.batch_delay).await;
            }

            if Instant::now() >= deadline {
                result
                    .skipped
                    .extend(packages.iter().skip(index * batch_size).cloned());
                break;
            }

            let mut handles: VecDeque<(String, JoinHandle<InstallStatus>)> = batch
                .iter()
                .map(|package| {
                    let prober = self.prober.clone();
                    let manager = manager.clone();
                    let package = package.clone();
                    let app_id = package.clone();
                    let handle = tokio::spawn(async move {
                        prober
                            .probe_within(manager.as_ref(), &package, force_refresh, max_age)
                            .await
                    });
                    (app_id, handle)
                })
                .collect();

            while let Some((app_id, mut handle)) = handles.pop_front() {
                let status = match timeout_at(deadline, &mut handle).await {
                    Ok(Ok(status)) => status,
                    Ok(Err(err)) => InstallStatus::unknown(format!("探测任务异常: {}", err)),
                    Err(_) => {
                        handle.abort();
                        result.skipped.push(app_id);
                        for (rest, handle) in handles.drain(..) {
                            handle.abort();
                            result.skipped.push(rest);
                        }
                        break;
                    }
                };

                debug!("{} 检查完成: {}", manager.name(), app_id);
                result.record(app_id.clone(), status.clone());
                if let Some(sender) = progress {
                    let _ = sender.send(BulkProgress {
                        completed: result.results.len(),
                        total,
                        app_id,
                        status,
                    });
                }
            }

            if !result.skipped.is_empty() {
                result
                    .skipped
                    .extend(packages.iter().skip((index + 1) * batch_size).cloned());
                break;
            }
        }

        if !result.skipped.is_empty() {
            let message = format!(
                "批量检查超时 ({} 秒)，已完成 {}/{}",
                self.config.timeout.as_secs(),
                result.results.len(),
                total
            );
            warn!("{}: {}", manager.name(), message);
            result.success = false;
            result.error = Some(message);
        } else {
            info!(
                "{} 批量检查完成: {} 个结果, {} 个失败",
                manager.name(),
                result.results.len(),
                result.errors.len()
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeManager;
    use pkgdeck_cache::StatusCache;
    use tokio::sync::mpsc;

    fn reconciler(config: BulkConfig) -> BulkReconciler {
        let prober = Arc::new(StatusProber::new(Arc::new(StatusCache::new())));
        BulkReconciler::new(prober, config)
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_does_not_abort_batch() {
        let fake = Arc::new(FakeManager::new("winget"));
        fake.script_status("A", vec![Ok(InstallStatus::installed("1.0"))]);
        fake.script_status("B", vec![Err(1)]);
        fake.script_status("C", vec![Ok(InstallStatus::NotInstalled)]);

        let result = reconciler(BulkConfig::default())
            .check(fake.clone(), &ids(&["A", "B", "C"]), false, None)
            .await;

        assert!(result.success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.status_of("A"), Some(&InstallStatus::installed("1.0")));
        assert_eq!(result.status_of("C"), Some(&InstallStatus::NotInstalled));
        assert!(result.status_of("B").unwrap().is_unknown());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].app_id, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_input_order() {
        let fake = Arc::new(FakeManager::new("choco"));
        let packages = ids(&["git", "nodejs", "7zip", "vlc", "curl", "jq", "python"]);

        let result = reconciler(BulkConfig {
            batch_size: 3,
            ..BulkConfig::default()
        })
        .check(fake.clone(), &packages, false, None)
        .await;

        let order: Vec<&str> = result.results.iter().map(|e| e.app_id.as_str()).collect();
        assert_eq!(order, vec!["git", "nodejs", "7zip", "vlc", "curl", "jq", "python"]);
        assert_eq!(fake.probe_calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_spaced_out() {
        let fake = Arc::new(FakeManager::new("choco"));
        let packages = ids(&["a", "b", "c", "d", "e", "f", "g"]);
        let started = Instant::now();

        reconciler(BulkConfig {
            batch_size: 3,
            batch_delay: Duration::from_millis(500),
            timeout: DEFAULT_BULK_TIMEOUT,
        })
        .check(fake, &packages, false, None)
        .await;

        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_results() {
        let fake = Arc::new(FakeManager::new("winget").with_probe_delay(Duration::from_secs(10)));
        let packages = ids(&["a", "b", "c", "d", "e", "f"]);

        let result = reconciler(BulkConfig {
            batch_size: 2,
            batch_delay: Duration::ZERO,
            timeout: Duration::from_secs(25),
        })
        .check(fake, &packages, true, None)
        .await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(result.results.len(), 4);
        assert_eq!(result.skipped, ids(&["e", "f"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events() {
        let fake = Arc::new(FakeManager::new("winget"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        reconciler(BulkConfig::default())
            .check(fake, &ids(&["a", "b", "c"]), false, Some(&tx))
            .await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push((event.completed, event.total));
        }
        assert_eq!(events, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_uses_cache() {
        let fake = Arc::new(FakeManager::new("winget"));
        let reconciler = reconciler(BulkConfig::default());
        let packages = ids(&["a", "b"]);

        reconciler.check(fake.clone(), &packages, false, None).await;
        reconciler.check(fake.clone(), &packages, false, None).await;
        assert_eq!(fake.probe_calls(), 2);

        reconciler.check(fake.clone(), &packages, true, None).await;
        assert_eq!(fake.probe_calls(), 4);
    }
}
