pub mod opendal_tree;

#[cfg(test)]
pub(crate) mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{StorageConfig, StorageType};

pub use opendal_tree::OpendalTree;

/// 远程条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// 目录列表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified_at,
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Folder,
            size: 0,
            modified_at: DateTime::<Utc>::default(),
        }
    }
}

/// 远程错误分类，由传输层给出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 目录不存在或无权限：只放弃当前分支
    Navigational,
    /// 连接级故障：整次遍历终止
    Fatal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{op}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub op: &'static str,
    pub message: String,
}

impl RemoteError {
    pub fn navigational(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Navigational,
            op,
            message: message.into(),
        }
    }

    pub fn fatal(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Fatal,
            op,
            message: message.into(),
        }
    }

    pub fn is_navigational(&self) -> bool {
        self.kind == RemoteErrorKind::Navigational
    }
}

/// 远程目录树抽象：单个会话、单个目录游标
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// 建立连接（地址在创建时给定）
    async fn connect(&mut self) -> Result<(), RemoteError>;

    /// 当前目录，根目录为 "/"，其余不带结尾斜杠
    async fn current_dir(&self) -> Result<String, RemoteError>;

    /// 列出当前目录
    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// 进入目录，`name` 以 "/" 开头时按绝对路径处理
    async fn change_dir(&mut self, name: &str) -> Result<(), RemoteError>;

    /// 返回上级目录
    async fn change_to_parent(&mut self) -> Result<(), RemoteError>;

    async fn disconnect(&mut self);

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程目录树
pub fn create_tree(config: &StorageConfig) -> Result<Box<dyn RemoteTree>> {
    config.validate()?;
    match config.typ {
        StorageType::Ftp => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("FTP storage requires endpoint"))?;
            tracing::debug!("创建FTP连接: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Box::new(OpendalTree::ftp(
                endpoint,
                config.username.as_deref(),
                config.password.as_deref(),
                config.root.as_deref(),
            )?))
        }
        StorageType::Local => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Local storage requires path"))?;
            tracing::debug!("创建本地目录树: {}", path);
            Ok(Box::new(OpendalTree::local(path)?))
        }
    }
}
