//! 内存目录树，供遍历和任务测试使用

use super::opendal_tree::{join_dir, parent_dir};
use super::{EntryKind, RemoteEntry, RemoteError, RemoteTree};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

pub(crate) struct MemoryTree {
    dirs: BTreeMap<String, Vec<RemoteEntry>>,
    cwd: String,
    denied: HashSet<String>,
    list_denied: HashSet<String>,
    fail_after_lists: Option<usize>,
    listed: Mutex<Vec<String>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert("/".to_string(), Vec::new());
        Self {
            dirs,
            cwd: "/".to_string(),
            denied: HashSet::new(),
            list_denied: HashSet::new(),
            fail_after_lists: None,
            listed: Mutex::new(Vec::new()),
        }
    }

    /// 添加或替换文件，自动创建父目录
    pub fn with_file(mut self, path: &str, size: u64, modified_at: DateTime<Utc>) -> Self {
        self.set_file(path, size, modified_at);
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.ensure_dir(path);
        self
    }

    /// 进入该目录时返回导航错误
    pub fn deny(mut self, path: &str) -> Self {
        self.denied.insert(path.to_string());
        self
    }

    /// 可以进入，但列出内容时返回导航错误
    pub fn deny_list(mut self, path: &str) -> Self {
        self.list_denied.insert(path.to_string());
        self
    }

    /// 成功列出 n 个目录之后，下一次列表返回致命错误
    pub fn fail_after_lists(mut self, n: usize) -> Self {
        self.fail_after_lists = Some(n);
        self
    }

    pub fn set_file(&mut self, path: &str, size: u64, modified_at: DateTime<Utc>) {
        let (dir, name) = split(path);
        self.ensure_dir(&dir);
        let entries = self.dirs.entry(dir).or_default();
        entries.retain(|e| e.name != name);
        entries.push(RemoteEntry::file(name, size, modified_at));
    }

    pub fn remove_file(&mut self, path: &str) {
        let (dir, name) = split(path);
        if let Some(entries) = self.dirs.get_mut(&dir) {
            entries.retain(|e| !(e.kind == EntryKind::File && e.name == name));
        }
    }

    pub fn listed(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    fn ensure_dir(&mut self, path: &str) {
        let path = join_dir("/", path);
        if self.dirs.contains_key(&path) {
            return;
        }
        self.dirs.insert(path.clone(), Vec::new());
        if let Some(parent) = parent_dir(&path) {
            self.ensure_dir(&parent);
            let (_, name) = split(&path);
            let siblings = self.dirs.entry(parent).or_default();
            if !siblings.iter().any(|e| e.name == name) {
                siblings.push(RemoteEntry::folder(name));
            }
        }
    }
}

fn split(path: &str) -> (String, String) {
    let path = join_dir("/", path);
    let idx = path.rfind('/').unwrap_or(0);
    let dir = if idx == 0 { "/" } else { &path[..idx] };
    (dir.to_string(), path[idx + 1..].to_string())
}

#[async_trait]
impl RemoteTree for MemoryTree {
    async fn connect(&mut self) -> Result<(), RemoteError> {
        self.cwd = "/".to_string();
        Ok(())
    }

    async fn current_dir(&self) -> Result<String, RemoteError> {
        Ok(self.cwd.clone())
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut listed = self.listed.lock().unwrap();
        if self.fail_after_lists.is_some_and(|n| listed.len() >= n) {
            return Err(RemoteError::fatal("list", "connection reset by peer"));
        }
        if self.list_denied.contains(&self.cwd) {
            return Err(RemoteError::navigational("list", "550 permission denied"));
        }
        listed.push(self.cwd.clone());

        let mut entries = vec![RemoteEntry::folder("."), RemoteEntry::folder("..")];
        entries.extend(self.dirs.get(&self.cwd).cloned().unwrap_or_default());
        Ok(entries)
    }

    async fn change_dir(&mut self, name: &str) -> Result<(), RemoteError> {
        let target = join_dir(&self.cwd, name);
        if self.denied.contains(&target) {
            return Err(RemoteError::navigational("cd", "550 permission denied"));
        }
        if !self.dirs.contains_key(&target) {
            return Err(RemoteError::navigational("cd", "550 no such directory"));
        }
        self.cwd = target;
        Ok(())
    }

    async fn change_to_parent(&mut self) -> Result<(), RemoteError> {
        match parent_dir(&self.cwd) {
            Some(parent) => {
                self.cwd = parent;
                Ok(())
            }
            None => Err(RemoteError::navigational("cdup", "already at root")),
        }
    }

    async fn disconnect(&mut self) {}

    fn name(&self) -> &str {
        "memory"
    }
}
