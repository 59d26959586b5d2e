use crate::manager::{ManagerRegistry, PackageManager};
use crate::orchestrator::Orchestrator;
use crate::package::{InstallStatus, Job, JobStatus, Operation, OperationOutcome, PackageKey};
use crate::retry::BackoffPolicy;
use chrono::{DateTime, Utc};
use pkgdeck_cache::StatusCache;
use pkgdeck_error::{PkgdeckError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_QUEUE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub tick: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_QUEUE_TICK,
            backoff: BackoffPolicy::default(),
        }
    }
}

type Completion = oneshot::Sender<Result<OperationOutcome>>;

/// 入队后返回给调用方的句柄，`wait` 等待操作最终结果。
#[derive(Debug)]
pub struct OperationHandle {
    pub id: Uuid,
    pub manager: String,
    pub package: String,
    pub operation: Operation,
    receiver: oneshot::Receiver<Result<OperationOutcome>>,
}

impl OperationHandle {
    pub async fn wait(self) -> Result<OperationOutcome> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(PkgdeckError::QueueClosed),
        }
    }
}

struct TrackedOperation {
    id: Uuid,
    manager: String,
    package: String,
    operation: Operation,
    status: JobStatus,
    retry_count: u32,
    next_backoff: Duration,
    ready_at: Instant,
    enqueued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    completion: Option<Completion>,
    cancel: Option<oneshot::Sender<()>>,
}

impl TrackedOperation {
    fn job(&self) -> Job {
        Job {
            id: self.id,
            manager: self.manager.clone(),
            operation: self.operation,
            target: self.package.clone(),
            status: self.status,
            retry_count: self.retry_count,
            next_backoff_ms: self.next_backoff.as_millis() as u64,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            error: self.last_error.clone(),
        }
    }

    fn settle(mut self, result: Result<OperationOutcome>) {
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(result);
        }
    }
}

struct QueueState {
    ops: HashMap<PackageKey, TrackedOperation>,
    order: VecDeque<PackageKey>,
}

struct ReadyJob {
    id: Uuid,
    key: PackageKey,
    package: String,
    operation: Operation,
    manager: Arc<dyn PackageManager>,
    cancel: oneshot::Receiver<()>,
}

struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
    config: QueueConfig,
    managers: Arc<ManagerRegistry>,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<StatusCache<InstallStatus>>,
}

/// 全局操作队列。
///
/// 同一 (管理器, 包) 同时最多只有一个操作（等待或运行中）；
/// 单个 worker 按先进先出顺序逐个执行，所以任意时刻最多一个操作处于运行状态。
/// 失败按指数退避重新排队，重试次数用尽后以 `RetryExhausted` 结束。
pub struct OperationQueue {
    shared: Arc<QueueShared>,
    worker: Option<JoinHandle<()>>,
}

impl OperationQueue {
    /// 创建队列并启动 worker，必须在 tokio 运行时内调用。
    pub fn new(
        config: QueueConfig,
        managers: Arc<ManagerRegistry>,
        orchestrator: Arc<Orchestrator>,
        cache: Arc<StatusCache<InstallStatus>>,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                ops: HashMap::new(),
                order: VecDeque::new(),
            }),
            notify: Notify::new(),
            config,
            managers,
            orchestrator,
            cache,
        });

        let worker = tokio::spawn(run_worker(shared.clone()));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub async fn enqueue(
        &self,
        manager: &str,
        package: &str,
        operation: Operation,
    ) -> Result<OperationHandle> {
        if !self.shared.managers.contains_key(manager) {
            return Err(PkgdeckError::ManagerNotFound {
                name: manager.to_string(),
            });
        }

        let key = PackageKey::new(manager, package);
        let (sender, receiver) = oneshot::channel();
        let id = Uuid::new_v4();

        {
            let mut state = self.shared.state.lock().await;
            if state.ops.contains_key(&key) {
                warn!("拒绝重复操作: {} {}", key, operation);
                return Err(PkgdeckError::DuplicateOperation {
                    manager: manager.to_string(),
                    package: package.to_string(),
                });
            }

            state.ops.insert(
                key.clone(),
                TrackedOperation {
                    id,
                    manager: manager.to_string(),
                    package: package.to_string(),
                    operation,
                    status: JobStatus::Pending,
                    retry_count: 0,
                    next_backoff: Duration::ZERO,
                    ready_at: Instant::now(),
                    enqueued_at: Utc::now(),
                    started_at: None,
                    last_error: None,
                    completion: Some(sender),
                    cancel: None,
                },
            );
            state.order.push_back(key);
        }

        self.shared.notify.notify_one();
        info!("已加入队列: {} {} {}", manager, operation, package);

        Ok(OperationHandle {
            id,
            manager: manager.to_string(),
            package: package.to_string(),
            operation,
            receiver,
        })
    }

    /// 取消 (管理器, 包) 上的操作，返回是否存在被取消的操作。
    ///
    /// 运行中的操作会立即以取消结束并释放占位；worker 随后丢弃执行中的
    /// future，外部进程被终止。进程若已越过不可回退的步骤，副作用仍可能落地。
    pub async fn stop(&self, manager: &str, package: &str) -> bool {
        let key = PackageKey::new(manager, package);
        let mut op = {
            let mut state = self.shared.state.lock().await;
            let Some(op) = state.ops.remove(&key) else {
                return false;
            };
            state.order.retain(|queued| queued != &key);
            op
        };

        warn!("已取消 {} {} ({:?})", key, op.operation, op.status);
        if let Some(cancel) = op.cancel.take() {
            let _ = cancel.send(());
        }
        op.settle(Err(PkgdeckError::OperationCanceled {
            manager: manager.to_string(),
            package: package.to_string(),
        }));
        true
    }

    pub async fn snapshot(&self) -> Vec<Job> {
        let state = self.shared.state.lock().await;
        let mut jobs: Vec<Job> = state.ops.values().map(TrackedOperation::job).collect();
        jobs.sort_by_key(|job| job.enqueued_at);
        jobs
    }

    pub async fn is_tracked(&self, manager: &str, package: &str) -> bool {
        let state = self.shared.state.lock().await;
        state.ops.contains_key(&PackageKey::new(manager, package))
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_worker(shared: Arc<QueueShared>) {
    loop {
        while let Some(job) = shared.next_ready().await {
            shared.execute(job).await;
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = sleep(shared.config.tick) => {}
        }
    }
}

impl QueueShared {
    async fn next_ready(&self) -> Option<ReadyJob> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let position = state.order.iter().position(|key| {
            state
                .ops
                .get(key)
                .map(|op| op.ready_at <= now)
                .unwrap_or(false)
        })?;
        let key = state.order.remove(position)?;
        let op = state.ops.get_mut(&key)?;

        let Some(manager) = self.managers.get(&op.manager).cloned() else {
            warn!("未知的包管理器: {}", op.manager);
            let op = state.ops.remove(&key)?;
            let name = op.manager.clone();
            op.settle(Err(PkgdeckError::ManagerNotFound { name }));
            return None;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        op.status = JobStatus::Running;
        op.started_at.get_or_insert_with(Utc::now);
        op.cancel = Some(cancel_tx);

        Some(ReadyJob {
            id: op.id,
            key,
            package: op.package.clone(),
            operation: op.operation,
            manager,
            cancel: cancel_rx,
        })
    }

    async fn execute(&self, job: ReadyJob) {
        let ReadyJob {
            id,
            key,
            package,
            operation,
            manager,
            cancel,
        } = job;

        let result = tokio::select! {
            result = self.orchestrator.run(manager.as_ref(), operation, &package) => result,
            _ = cancel => {
                info!("运行中的操作已取消: {} {}", key, operation);
                return;
            }
        };

        let mut state = self.state.lock().await;
        let tracked = match state.ops.get_mut(&key) {
            Some(op) if op.id == id => op,
            _ => {
                debug!("操作在完成前已被移除: {}", key);
                return;
            }
        };

        let err = match result {
            Ok(outcome) => {
                let Some(op) = state.ops.remove(&key) else {
                    return;
                };
                drop(state);
                info!("操作成功: {} {} ({:?})", key, operation, outcome.verification);
                self.cache.invalidate(manager.cache_key()).await;
                op.settle(Ok(outcome));
                return;
            }
            Err(err) => err,
        };

        let policy = &self.config.backoff;
        if err.is_retryable() && policy.can_retry(tracked.retry_count) {
            let delay = policy.delay_for(tracked.retry_count);
            tracked.retry_count += 1;
            tracked.next_backoff = delay;
            tracked.ready_at = Instant::now() + delay;
            tracked.status = JobStatus::Pending;
            tracked.cancel = None;
            tracked.last_error = Some(err.to_string());
            warn!(
                "操作失败: {} {}: {}，{:?} 后进行第 {} 次重试",
                key, operation, err, delay, tracked.retry_count
            );
            state.order.push_back(key);
            return;
        }

        let Some(op) = state.ops.remove(&key) else {
            return;
        };
        drop(state);
        warn!("操作最终失败: {} {}: {}", key, operation, err);
        self.cache.invalidate(manager.cache_key()).await;
        if !err.is_retryable() {
            op.settle(Err(err));
            return;
        }
        let attempts = op.retry_count;
        let failure = PkgdeckError::RetryExhausted {
            manager: op.manager.clone(),
            package: op.package.clone(),
            attempts,
            last_error: err.to_string(),
        };
        op.settle(Err(failure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::orchestrator::VerifyConfig;
    use crate::prober::StatusProber;
    use crate::testing::FakeManager;

    struct Harness {
        queue: OperationQueue,
        cache: Arc<StatusCache<InstallStatus>>,
    }

    fn harness(fake: Arc<FakeManager>, backoff: BackoffPolicy) -> Harness {
        let cache = Arc::new(StatusCache::new());
        let prober = Arc::new(StatusProber::new(cache.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            prober,
            VerifyConfig {
                max_attempts: 1,
                delay: Duration::ZERO,
            },
        ));
        let mut managers: ManagerRegistry = HashMap::new();
        let name = fake.name().to_string();
        managers.insert(name, fake);

        let queue = OperationQueue::new(
            QueueConfig {
                tick: DEFAULT_QUEUE_TICK,
                backoff,
            },
            Arc::new(managers),
            orchestrator,
            cache.clone(),
        );
        Harness { queue, cache }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_operation_is_rejected() {
        let fake = Arc::new(FakeManager::new("winget").with_apply_delay(Duration::from_secs(30)));
        fake.script_status("X", vec![Ok(InstallStatus::installed("1.0"))]);
        let h = harness(fake.clone(), BackoffPolicy::default());

        let first = h.queue.enqueue("winget", "X", Operation::Install).await.unwrap();
        let second = h.queue.enqueue("winget", "x", Operation::Uninstall).await;

        assert!(second.unwrap_err().is_duplicate());
        assert!(first.wait().await.unwrap().success);
        assert_eq!(fake.apply_calls(), 1);
        assert_eq!(fake.max_running(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_run_one_at_a_time() {
        let fake = Arc::new(FakeManager::new("winget").with_apply_delay(Duration::from_secs(10)));
        fake.script_status("A", vec![Ok(InstallStatus::installed("1.0"))]);
        fake.script_status("B", vec![Ok(InstallStatus::installed("1.0"))]);
        let h = harness(fake.clone(), BackoffPolicy::default());

        let a = h.queue.enqueue("winget", "A", Operation::Install).await.unwrap();
        let b = h.queue.enqueue("winget", "B", Operation::Install).await.unwrap();

        assert!(a.wait().await.is_ok());
        assert!(b.wait().await.is_ok());
        assert_eq!(fake.max_running(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_retries() {
        let fake = Arc::new(FakeManager::new("choco"));
        fake.script_apply(vec![Err(1)]);
        let policy = BackoffPolicy {
            max_retries: 4,
            ..BackoffPolicy::default()
        };
        let h = harness(fake.clone(), policy);

        let handle = h.queue.enqueue("choco", "git", Operation::Install).await.unwrap();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, PkgdeckError::RetryExhausted { attempts: 4, .. }));
        assert!(!err.is_cancellation());
        assert_eq!(fake.apply_calls(), 5);

        let times = fake.apply_times();
        for (retry, pair) in times.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            let expected = policy.delay_for(retry as u32);
            assert!(gap >= expected, "第 {} 次重试间隔过短: {:?}", retry, gap);
            assert!(gap < expected + DEFAULT_QUEUE_TICK + Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marker_is_not_retried() {
        let fake = Arc::new(FakeManager::new("winget"));
        fake.script_apply(vec![Ok(CommandOutput::new(0, "Error: access denied"))]);
        let h = harness(fake.clone(), BackoffPolicy::default());
        h.cache.set("winget", "Other.App", InstallStatus::installed("1.0")).await;

        let err = h
            .queue
            .enqueue("winget", "X", Operation::Install)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, PkgdeckError::OperationFailed { .. }));
        assert_eq!(fake.apply_calls(), 1);
        assert!(!h.queue.is_tracked("winget", "X").await);
        assert!(h
            .cache
            .get("winget", "Other.App", Duration::from_secs(600))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let fake = Arc::new(FakeManager::new("choco"));
        fake.script_apply(vec![
            Err(1),
            Ok(CommandOutput::new(0, "The install of git was successful.")),
        ]);
        fake.script_status("git", vec![Ok(InstallStatus::installed("2.44.0"))]);
        let h = harness(fake.clone(), BackoffPolicy::default());

        let outcome = h
            .queue
            .enqueue("choco", "git", Operation::Install)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(outcome.final_status.version(), Some("2.44.0"));
        assert_eq!(fake.apply_calls(), 2);
        assert!(h.queue.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_frees_slot() {
        let fake = Arc::new(FakeManager::new("winget").with_apply_delay(Duration::from_secs(60)));
        let h = harness(fake.clone(), BackoffPolicy::default());
        h.cache.set("winget", "Other.App", InstallStatus::installed("1.0")).await;

        let handle = h.queue.enqueue("winget", "X", Operation::Install).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.queue.snapshot().await[0].status, JobStatus::Running);

        assert!(h.queue.stop("winget", "X").await);
        assert!(handle.wait().await.unwrap_err().is_cancellation());
        assert!(h
            .cache
            .get("winget", "Other.App", Duration::from_secs(600))
            .await
            .is_some());

        let again = h.queue.enqueue("winget", "X", Operation::Uninstall).await;
        assert!(again.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_operation() {
        let fake = Arc::new(FakeManager::new("winget").with_apply_delay(Duration::from_secs(60)));
        let h = harness(fake.clone(), BackoffPolicy::default());

        let _running = h.queue.enqueue("winget", "A", Operation::Install).await.unwrap();
        let pending = h.queue.enqueue("winget", "B", Operation::Install).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(h.queue.stop("winget", "B").await);
        assert!(pending.wait().await.unwrap_err().is_cancellation());
        assert!(!h.queue.is_tracked("winget", "B").await);
        assert!(h.queue.is_tracked("winget", "A").await);
        assert!(!h.queue.stop("winget", "B").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_invalidates_manager_cache() {
        let fake = Arc::new(FakeManager::new("winget"));
        fake.script_status("X", vec![Ok(InstallStatus::installed("1.0"))]);
        let h = harness(fake.clone(), BackoffPolicy::default());
        h.cache.set("winget", "Other.App", InstallStatus::NotInstalled).await;

        h.queue
            .enqueue("winget", "X", Operation::Install)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert!(h
            .cache
            .get("winget", "Other.App", Duration::from_secs(600))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_manager_is_rejected() {
        let fake = Arc::new(FakeManager::new("winget"));
        let h = harness(fake, BackoffPolicy::default());

        let result = h.queue.enqueue("scoop", "X", Operation::Install).await;
        assert!(matches!(result, Err(PkgdeckError::ManagerNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_queue_closes_handles() {
        let fake = Arc::new(FakeManager::new("winget").with_apply_delay(Duration::from_secs(60)));
        let h = harness(fake, BackoffPolicy::default());

        let handle = h.queue.enqueue("winget", "X", Operation::Install).await.unwrap();
        drop(h);

        assert!(matches!(handle.wait().await, Err(PkgdeckError::QueueClosed)));
    }
}
