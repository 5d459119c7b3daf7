//! 工作流配置
//!
//! 提供引擎运行参数的统一配置，支持配置文件和环境变量覆盖。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 工作流引擎完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 批量操作配置
    pub bulk: BulkConfig,
    /// 通知器配置
    pub notifier: NotifierConfig,
}

/// 批量操作配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// 批量操作有界并发上限
    pub max_concurrency: usize,
    /// 外部协作方调用超时
    pub collaborator_timeout: Duration,
    /// 超时重试次数（仅超时错误重试）
    pub timeout_retries: u32,
    /// zip/导出软上限：超过此数量需调用方显式确认，引擎不设硬上限
    pub confirmation_threshold: usize,
}

/// 通知器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// 每订阅者事件通道容量
    pub channel_capacity: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            collaborator_timeout: Duration::from_secs(10),
            timeout_retries: 1,
            confirmation_threshold: 20,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            bulk: BulkConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// 从可选配置文件和 `RIS_` 前缀环境变量加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let config = builder
            .add_source(Environment::with_prefix("RIS").separator("__"))
            .build()
            .context("Failed to build workflow configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize workflow configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.bulk.max_concurrency, 8);
        assert_eq!(config.bulk.timeout_retries, 1);
        assert_eq!(config.bulk.confirmation_threshold, 20);
        assert_eq!(config.notifier.channel_capacity, 64);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = WorkflowConfig::load(None).unwrap();
        assert_eq!(config.bulk.max_concurrency, 8);
    }
}
