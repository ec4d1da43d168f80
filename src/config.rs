//! 应用配置模块

use crate::core::{FilterMasks, PatternError};
use crate::logging::LogConfig;
use crate::notify::telegram::DEFAULT_API_BASE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// 检查间隔上限（分钟），一周
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("target {target}: {source}")]
    Pattern {
        target: String,
        source: PatternError,
    },
    #[error("{storage} storage requires {field}")]
    Missing {
        storage: &'static str,
        field: &'static str,
    },
    #[error("target {target}: {message}")]
    Notifier { target: String, message: String },
}

/// 存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Ftp,
    Local,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    /// FTP 地址，如 `ftp.example.com:21`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// FTP 服务端的根目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// 本地目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.typ {
            StorageType::Ftp if self.endpoint.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::Missing {
                    storage: "FTP",
                    field: "endpoint",
                })
            }
            StorageType::Local if self.path.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::Missing {
                    storage: "Local",
                    field: "path",
                })
            }
            _ => Ok(()),
        }
    }
}

/// 转发到通知的最低日志级别
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Error,
    #[default]
    Warn,
    Info,
}

impl NotifyLevel {
    pub fn tracing_level(&self) -> tracing::Level {
        match self {
            NotifyLevel::Error => tracing::Level::ERROR,
            NotifyLevel::Warn => tracing::Level::WARN,
            NotifyLevel::Info => tracing::Level::INFO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// 单个监控目标
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// 相对路径以配置目录为基准
    pub snapshot_path: PathBuf,
    pub storage: StorageConfig,
    /// 遍历起始目录
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(flatten)]
    pub masks: FilterMasks,
    #[serde(default)]
    pub notify_level: NotifyLevel,
    #[serde(default)]
    pub show_progress: bool,
}

fn default_root_path() -> String {
    "/".to_string()
}

impl TargetConfig {
    pub fn resolved_snapshot_path(&self, config_dir: &Path) -> PathBuf {
        if self.snapshot_path.is_absolute() {
            self.snapshot_path.clone()
        } else {
            config_dir.join(&self.snapshot_path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// 检查间隔（分钟）
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_interval_minutes() -> u64 {
    30 // 默认 30 分钟
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// 检查间隔，限制在 1 分钟到一周之间
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.clamp(1, MAX_INTERVAL_MINUTES) * 60)
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
    } else {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    };

    base.map(|p| p.join("ftpwatch"))
        .unwrap_or_else(|| PathBuf::from(".ftpwatch"))
}
