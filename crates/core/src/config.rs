use crate::executor::{CommandTimeouts, COMMAND_TIMEOUT, PROBE_TIMEOUT};
use crate::orchestrator::{VerifyConfig, DEFAULT_VERIFY_ATTEMPTS, DEFAULT_VERIFY_DELAY};
use crate::queue::{QueueConfig, DEFAULT_QUEUE_TICK};
use crate::reconciler::{BulkConfig, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_BULK_TIMEOUT};
use crate::retry::{
    BackoffPolicy, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES,
    DEFAULT_MULTIPLIER,
};
use pkgdeck_cache::CacheConfig;
use pkgdeck_error::{PkgdeckError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

const CONFIG_DIR: &str = "pkgdeck";
const CONFIG_FILE: &str = "config.json";

/// 所有可调参数，JSON 文件中缺省的字段取默认值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub status_ttl_secs: u64,
    pub bulk_ttl_secs: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub bulk_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: u32,
    pub queue_tick_ms: u64,
    pub verify_attempts: u32,
    pub verify_delay_ms: u64,
    pub probe_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let cache = CacheConfig::default();
        Self {
            status_ttl_secs: cache.status_ttl.as_secs(),
            bulk_ttl_secs: cache.bulk_ttl.as_secs(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY.as_millis() as u64,
            bulk_timeout_secs: DEFAULT_BULK_TIMEOUT.as_secs(),
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            queue_tick_ms: DEFAULT_QUEUE_TICK.as_millis() as u64,
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_delay_ms: DEFAULT_VERIFY_DELAY.as_millis() as u64,
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            command_timeout_secs: COMMAND_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// 读取配置：优先使用显式路径，其次是用户配置目录下的 config.json，都没有则使用默认值。
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|path| path.exists()) {
                Some(path) => path,
                None => {
                    debug!("未找到配置文件，使用默认配置");
                    return Ok(Self::default());
                }
            },
        };

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| PkgdeckError::ConfigError {
                message: format!("读取配置失败 {}: {}", path.display(), e),
            })?;

        let settings = Self::from_json(&content)?;
        info!("已加载配置: {}", path.display());
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(content).map_err(|e| PkgdeckError::JsonError {
                message: format!("解析配置失败: {}", e),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(PkgdeckError::ConfigError {
                message: message.to_string(),
            })
        };

        if self.batch_size == 0 {
            return invalid("batch_size 必须大于 0");
        }
        if self.backoff_multiplier == 0 {
            return invalid("backoff_multiplier 必须大于 0");
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return invalid("max_backoff_ms 不能小于 initial_backoff_ms");
        }
        if self.queue_tick_ms == 0 {
            return invalid("queue_tick_ms 必须大于 0");
        }
        if self.verify_attempts == 0 {
            return invalid("verify_attempts 必须大于 0");
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            status_ttl: Duration::from_secs(self.status_ttl_secs),
            bulk_ttl: Duration::from_secs(self.bulk_ttl_secs),
        }
    }

    pub fn bulk_config(&self) -> BulkConfig {
        BulkConfig {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            timeout: Duration::from_secs(self.bulk_timeout_secs),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            tick: Duration::from_millis(self.queue_tick_ms),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.initial_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms),
                max_retries: self.max_retries,
                multiplier: self.backoff_multiplier,
            },
        }
    }

    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            max_attempts: self.verify_attempts,
            delay: Duration::from_millis(self.verify_delay_ms),
        }
    }

    pub fn command_timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            probe: Duration::from_secs(self.probe_timeout_secs),
            mutate: Duration::from_secs(self.command_timeout_secs),
        }
    }
}
