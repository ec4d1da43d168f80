use super::{EntryKind, RemoteEntry, RemoteError, RemoteTree};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{ErrorKind, Metakey, Operator};
use tracing::debug;

/// 基于 opendal 的远程目录树，目录游标由本地维护
pub struct OpendalTree {
    operator: Operator,
    name: String,
    cwd: String,
}

impl OpendalTree {
    pub fn ftp(
        endpoint: &str,
        username: Option<&str>,
        password: Option<&str>,
        root: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::Ftp;

        let mut builder = Ftp::default().endpoint(endpoint);
        if let Some(user) = username {
            builder = builder.user(user);
        }
        if let Some(pass) = password {
            builder = builder.password(pass);
        }
        if let Some(r) = root {
            builder = builder.root(r);
        }

        let name = format!(
            "ftp://{}{}",
            endpoint
                .trim_start_matches("ftp://")
                .trim_end_matches('/'),
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self::with_operator(Operator::new(builder)?.finish(), name))
    }

    pub fn local(path: &str) -> Result<Self> {
        use opendal::services::Fs;

        let operator = Operator::new(Fs::default().root(path))?.finish();
        Ok(Self::with_operator(operator, format!("local:{}", path)))
    }

    pub fn with_operator(operator: Operator, name: String) -> Self {
        Self {
            operator,
            name,
            cwd: "/".to_string(),
        }
    }

    /// opendal 的目录路径需要以 "/" 结尾
    fn dir_path(path: &str) -> String {
        if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        }
    }
}

/// NotFound 和 PermissionDenied 视为可恢复的导航错误
fn classify(op: &'static str, err: opendal::Error) -> RemoteError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            RemoteError::navigational(op, err.to_string())
        }
        _ => RemoteError::fatal(op, err.to_string()),
    }
}

/// 拼接并规范化目录路径，结果不带结尾斜杠（根目录为 "/"）
pub(crate) fn join_dir(cwd: &str, name: &str) -> String {
    let mut parts: Vec<&str> = if name.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };

    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }

    format!("/{}", parts.join("/"))
}

/// 上级目录，根目录没有上级
pub(crate) fn parent_dir(cwd: &str) -> Option<String> {
    if cwd == "/" {
        return None;
    }
    let trimmed = cwd.trim_end_matches('/');
    let parent = &trimmed[..trimmed.rfind('/').unwrap_or(0)];
    Some(if parent.is_empty() {
        "/".to_string()
    } else {
        parent.to_string()
    })
}

#[async_trait]
impl RemoteTree for OpendalTree {
    async fn connect(&mut self) -> Result<(), RemoteError> {
        debug!("CONNECT: {}", self.name);
        self.operator
            .check()
            .await
            .map_err(|e| RemoteError::fatal("connect", e.to_string()))?;
        self.cwd = "/".to_string();
        debug!("CONNECT: 已连接 {}", self.name);
        Ok(())
    }

    async fn current_dir(&self) -> Result<String, RemoteError> {
        Ok(self.cwd.clone())
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let dir = Self::dir_path(&self.cwd);
        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| classify("list", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(|e| classify("list", e))? {
            // 部分服务会把目录自身也列出来
            if entry.path().trim_start_matches('/') == dir.trim_start_matches('/') {
                continue;
            }

            let meta = entry.metadata();
            let name = entry.name().trim_end_matches('/').to_string();
            if name.is_empty() {
                continue;
            }

            if meta.is_dir() {
                entries.push(RemoteEntry::folder(name));
            } else if meta.is_file() {
                entries.push(RemoteEntry {
                    name,
                    kind: EntryKind::File,
                    size: meta.content_length(),
                    modified_at: meta.last_modified().unwrap_or_default(),
                });
            } else {
                debug!("LIST: 跳过未知类型条目 {}", entry.path());
            }
        }

        let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        debug!("LIST {}: {:?}", self.cwd, names);

        Ok(entries)
    }

    async fn change_dir(&mut self, name: &str) -> Result<(), RemoteError> {
        let target = join_dir(&self.cwd, name);
        debug!("CD: {}", target);

        if target != "/" {
            let meta = self
                .operator
                .stat(&Self::dir_path(&target))
                .await
                .map_err(|e| classify("cd", e))?;
            if !meta.is_dir() {
                return Err(RemoteError::navigational(
                    "cd",
                    format!("{} is not a directory", target),
                ));
            }
        }

        self.cwd = target;
        Ok(())
    }

    async fn change_to_parent(&mut self) -> Result<(), RemoteError> {
        debug!("CDUP: {}", self.cwd);
        match parent_dir(&self.cwd) {
            Some(parent) => {
                self.cwd = parent;
                Ok(())
            }
            None => Err(RemoteError::navigational("cdup", "already at root")),
        }
    }

    async fn disconnect(&mut self) {
        self.cwd = "/".to_string();
        debug!("QUIT: {} 连接已关闭", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
