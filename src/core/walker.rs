//! 远程目录树遍历器
//!
//! 深度优先地进入每个被接受的目录，逐个文件与快照比较并原地更新快照。
//! 遇到导航类错误只放弃当前分支；其他远程错误立即终止整次遍历，
//! 此时调用方不得执行清理和保存。

use crate::core::report::{truncate_left, Alert, LOG_PATH_WIDTH};
use crate::core::snapshot::is_storable;
use crate::core::{ChangeSet, FileRecord, PathFilter, Snapshot};
use crate::storage::{EntryKind, RemoteEntry, RemoteError, RemoteTree};
use futures::future::{BoxFuture, FutureExt};
use std::io::Write;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("directory cursor lost: expected {expected}, server reports {actual}")]
    CursorLost { expected: String, actual: String },
}

/// 终端中的单行进度显示
#[derive(Debug, Default)]
struct Progress {
    last_len: usize,
}

impl Progress {
    fn show(&mut self, line: &str) {
        let len = line.chars().count();
        let pad = self.last_len.saturating_sub(len);
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "{}{}\r", line, " ".repeat(pad));
        let _ = stderr.flush();
        self.last_len = len;
    }

    fn clear(&mut self) {
        if self.last_len > 0 {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "{}\r", " ".repeat(self.last_len));
            let _ = stderr.flush();
            self.last_len = 0;
        }
    }
}

pub struct TreeWalker {
    filter: PathFilter,
    progress: Option<Progress>,
    alerts: Vec<Alert>,
}

/// 当前目录加上结尾斜杠，作为文件路径前缀
fn dir_prefix(cwd: &str) -> String {
    if cwd.ends_with('/') {
        cwd.to_string()
    } else {
        format!("{}/", cwd)
    }
}

impl TreeWalker {
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            progress: None,
            alerts: Vec::new(),
        }
    }

    /// 在终端显示当前所在目录
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled.then(Progress::default);
        self
    }

    /// 取出遍历过程中产生的告警
    pub fn take_alerts(&mut self) -> Vec<Alert> {
        std::mem::take(&mut self.alerts)
    }

    /// 从当前目录开始遍历
    pub async fn walk<T>(
        &mut self,
        tree: &mut T,
        snapshot: &mut Snapshot,
        changes: &mut ChangeSet,
    ) -> Result<(), WalkError>
    where
        T: RemoteTree + ?Sized,
    {
        let result = self.walk_dir(tree, snapshot, changes, true).await;
        if let Some(progress) = self.progress.as_mut() {
            progress.clear();
        }
        result
    }

    fn walk_dir<'a, T>(
        &'a mut self,
        tree: &'a mut T,
        snapshot: &'a mut Snapshot,
        changes: &'a mut ChangeSet,
        is_root: bool,
    ) -> BoxFuture<'a, Result<(), WalkError>>
    where
        T: RemoteTree + ?Sized,
    {
        async move {
            let cwd = dir_prefix(&tree.current_dir().await?);
            // 起始目录无法列出时整次遍历失败，否则清理会删掉全部记录
            let entries = match tree.list().await {
                Ok(entries) => entries,
                Err(err) if !is_root => {
                    self.navigation_failed(&cwd, err)?;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            if let Some(progress) = self.progress.as_mut() {
                progress.show(&cwd);
            }

            for entry in entries {
                match entry.kind {
                    EntryKind::File => {
                        if self.filter.accept_file(&entry.name) {
                            let key = format!("{}{}", cwd, entry.name);
                            if !is_storable(&key) {
                                self.unstorable(&key);
                                continue;
                            }
                            observe(key, &entry, snapshot, changes);
                        }
                    }
                    EntryKind::Folder => {
                        if !self.filter.descend_into(&cwd, &entry.name) {
                            continue;
                        }
                        let path = format!("{}{}", cwd, entry.name);
                        if !is_storable(&path) {
                            self.unstorable(&path);
                            continue;
                        }

                        if let Err(err) = tree.change_dir(&entry.name).await {
                            self.navigation_failed(&cwd, err)?;
                            continue;
                        }

                        self.walk_dir(&mut *tree, &mut *snapshot, &mut *changes, false)
                            .await?;

                        if let Err(err) = tree.change_to_parent().await {
                            self.navigation_failed(&cwd, err)?;
                            let actual = dir_prefix(&tree.current_dir().await?);
                            if actual != cwd {
                                return Err(WalkError::CursorLost {
                                    expected: cwd,
                                    actual,
                                });
                            }
                        }
                    }
                }
            }

            Ok(())
        }
        .boxed()
    }

    /// 导航错误记录告警后继续；其他错误向上传递
    fn navigation_failed(&mut self, cwd: &str, err: RemoteError) -> Result<(), WalkError> {
        if !err.is_navigational() {
            return Err(err.into());
        }
        let message = format!("{} {}: {}", err.op, cwd, err.message);
        warn!("{}", message);
        self.alerts.push(Alert::warn(message));
        Ok(())
    }

    /// 名称含快照分隔符的条目无法保存，跳过并告警
    fn unstorable(&mut self, path: &str) {
        let message = format!("skipped {:?}: name contains a reserved separator", path);
        error!("{}", message);
        self.alerts.push(Alert::error(message));
    }
}

/// 比较单个文件与快照记录；大小变化优先于时间变化
fn observe(key: String, entry: &RemoteEntry, snapshot: &mut Snapshot, changes: &mut ChangeSet) {
    match snapshot.get_mut(&key) {
        Some(record) if record.size != entry.size => {
            info!("~ {} size changed", truncate_left(&key, LOG_PATH_WIDTH));
            record.update(entry);
            changes.add_size_changed(key);
        }
        Some(record) if record.modified_at != entry.modified_at => {
            info!("~ {} datetime changed", truncate_left(&key, LOG_PATH_WIDTH));
            record.update(entry);
            changes.add_date_changed(key);
        }
        Some(record) => {
            record.seen = true;
        }
        None => {
            info!("+ {} new file", truncate_left(&key, LOG_PATH_WIDTH));
            snapshot.insert(FileRecord::observed(key.clone(), entry));
            changes.add_new(key);
        }
    }
    debug!("已检查 {}", entry.name);
}
