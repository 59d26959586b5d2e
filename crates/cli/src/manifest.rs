use anyhow::{Context, Result};
use pkgdeck_core::{InstallStatus, Operation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 清单中的一条期望状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub manager: String,
    pub id: String,
    #[serde(default = "default_installed")]
    pub installed: bool,
}

fn default_installed() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub packages: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    InSync,
    Apply(Operation),
    /// 状态未知时不做变更
    Skip(String),
}

impl Manifest {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("清单格式无效")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取清单 {} 失败", path.display()))?;
        Self::from_json(&content)
    }

    /// 按管理器分组，组内保持清单顺序。
    pub fn by_manager(&self) -> BTreeMap<&str, Vec<&ManifestEntry>> {
        let mut groups: BTreeMap<&str, Vec<&ManifestEntry>> = BTreeMap::new();
        for entry in &self.packages {
            groups.entry(entry.manager.as_str()).or_default().push(entry);
        }
        groups
    }
}

pub fn plan(desired: bool, current: &InstallStatus) -> SyncAction {
    match current {
        InstallStatus::Unknown { error } => SyncAction::Skip(error.clone()),
        status if status.is_installed() == desired => SyncAction::InSync,
        _ if desired => SyncAction::Apply(Operation::Install),
        _ => SyncAction::Apply(Operation::Uninstall),
    }
}
