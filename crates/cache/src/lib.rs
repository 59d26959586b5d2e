use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

const STATUS_TTL: Duration = Duration::from_secs(10 * 60);
const BULK_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 单包查询的过期窗口
    pub status_ttl: Duration,
    /// 批量查询的过期窗口
    pub bulk_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            status_ttl: STATUS_TTL,
            bulk_ttl: BULK_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    stored_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

type EntryKey = (String, String);

/// 包 ID 的规范形式：去掉首尾空白并转为小写。缓存与操作队列共用。
pub fn normalize_package_id(id: &str) -> String {
    id.trim().to_lowercase()
}

struct CacheState<T> {
    entries: HashMap<EntryKey, CacheEntry<T>>,
    generations: HashMap<String, u64>,
}

/// 进程内的状态缓存，按 (管理器, 包 ID) 存储最近一次探测结果。
///
/// 包 ID 比较不区分大小写。每个管理器维护一个代数（generation），
/// 整体失效时递增；探测开始时记下的代数与提交时不一致，写入会被丢弃，
/// 这样失效之前开始的探测不会把旧结果写回缓存。
pub struct StatusCache<T> {
    state: RwLock<CacheState<T>>,
    config: CacheConfig,
}

impl<T: Clone> Default for StatusCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> StatusCache<T> {
    pub fn new() -> Self {
        Self::new_with_config(CacheConfig::default())
    }

    pub fn new_with_config(config: CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn entry_key(manager: &str, key: &str) -> EntryKey {
        (manager.to_string(), normalize_package_id(key))
    }

    /// 读取未过期的条目；超过 `max_age` 视为未命中。
    pub async fn get(&self, manager: &str, key: &str, max_age: Duration) -> Option<CacheEntry<T>> {
        let state = self.state.read().await;
        let entry = state.entries.get(&Self::entry_key(manager, key))?;

        if entry.age() > max_age {
            debug!("缓存过期: {}/{}", manager, key);
            return None;
        }

        debug!("缓存命中: {}/{}", manager, key);
        Some(entry.clone())
    }

    pub async fn generation(&self, manager: &str) -> u64 {
        let state = self.state.read().await;
        state.generations.get(manager).copied().unwrap_or(0)
    }

    pub async fn set(&self, manager: &str, key: &str, data: T) {
        let mut state = self.state.write().await;
        state.entries.insert(
            Self::entry_key(manager, key),
            CacheEntry {
                data,
                cached_at: Utc::now(),
                stored_at: Instant::now(),
            },
        );
        debug!("缓存已更新: {}/{}", manager, key);
    }

    /// 仅当管理器代数仍为 `generation` 时写入，返回是否写入成功。
    pub async fn set_if_current(&self, manager: &str, key: &str, data: T, generation: u64) -> bool {
        let mut state = self.state.write().await;
        let current = state.generations.get(manager).copied().unwrap_or(0);
        if current != generation {
            debug!(
                "丢弃过期写入: {}/{} (代数 {} != {})",
                manager, key, generation, current
            );
            return false;
        }

        state.entries.insert(
            Self::entry_key(manager, key),
            CacheEntry {
                data,
                cached_at: Utc::now(),
                stored_at: Instant::now(),
            },
        );
        debug!("缓存已更新: {}/{}", manager, key);
        true
    }

    /// 清除某个管理器下的全部条目并递增代数，返回清除的条目数。
    pub async fn invalidate(&self, manager: &str) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|(owner, _), _| owner != manager);
        let removed = before - state.entries.len();
        *state.generations.entry(manager.to_string()).or_insert(0) += 1;

        info!("缓存已清除: {} ({} 条)", manager, removed);
        removed
    }

    /// 删除存放时间超过 `older_than` 的条目，返回删除数量。
    pub async fn clean(&self, older_than: Duration) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.age() <= older_than);
        let cleaned = before - state.entries.len();

        if cleaned > 0 {
            info!("已清理 {} 个过期缓存", cleaned);
        }

        cleaned
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}
