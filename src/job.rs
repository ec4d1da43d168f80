//! 监控任务 - 一次完整的检查流程
//!
//! 加载快照 → 连接 → 进入起始目录 → 遍历 → 断开 → 清理 → 保存 → 发送通知。
//! 遍历失败时不清理也不保存，磁盘上的快照保持原样。

use crate::config::{AppConfig, ConfigError, StorageConfig, TargetConfig};
use crate::core::report::{truncate_left, LOG_PATH_WIDTH};
use crate::core::{render_alerts, render_changes, Alert, ChangeSet, PathFilter, Snapshot, TreeWalker};
use crate::notify::bot::UpdateBoard;
use crate::notify::{LogNotifier, MessageBuffer, Notifier, TelegramNotifier};
use crate::storage::{create_tree, RemoteTree};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

/// 单次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 保存后的快照记录数
    pub files: usize,
    pub new_files: usize,
    pub size_changed: usize,
    pub date_changed: usize,
    pub deleted: usize,
    /// 实际发出的消息条数
    pub messages: usize,
}

impl RunSummary {
    pub fn changes(&self) -> usize {
        self.new_files + self.size_changed + self.date_changed + self.deleted
    }
}

pub struct Target {
    name: String,
    snapshot_path: PathBuf,
    storage: StorageConfig,
    root_path: String,
    walker: TreeWalker,
    notify_level: Level,
    notifier: Arc<dyn Notifier>,
    chat_id: Option<String>,
    /// 上次成功运行的时间，与机器人共享
    board: Arc<UpdateBoard>,
}

impl Target {
    pub fn from_config(
        config: &TargetConfig,
        config_dir: &Path,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.storage.validate()?;
        let filter = PathFilter::new(&config.masks).map_err(|source| ConfigError::Pattern {
            target: config.name.clone(),
            source,
        })?;

        let board = Arc::new(UpdateBoard::default());
        board.register(&config.name, config.chat_id.as_deref());

        Ok(Self {
            name: config.name.clone(),
            snapshot_path: config.resolved_snapshot_path(config_dir),
            storage: config.storage.clone(),
            root_path: config.root_path.clone(),
            walker: TreeWalker::new(filter).with_progress(config.show_progress),
            notify_level: config.notify_level.tracing_level(),
            notifier,
            chat_id: config.chat_id.clone(),
            board,
        })
    }

    /// 改为向共享的更新表登记
    pub fn with_board(mut self, board: Arc<UpdateBoard>) -> Self {
        board.register(&self.name, self.chat_id.as_deref());
        self.board = board;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// 上次成功运行的时间
    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.board.last_update(&self.name)
    }

    /// 按配置建立连接并执行一次检查
    pub async fn run_once(&mut self) -> Result<RunSummary> {
        let mut tree = match create_tree(&self.storage) {
            Ok(tree) => tree,
            Err(e) => {
                self.fail(vec![], &e).await;
                return Err(e);
            }
        };
        self.run_with(tree.as_mut()).await
    }

    /// 执行一次检查，错误只记录日志
    pub async fn run_logged(&mut self) {
        match self.run_once().await {
            Ok(summary) => debug!("[{}] 本轮结果: {:?}", self.name, summary),
            Err(e) => error!("[{}] 本轮检查失败: {:#}", self.name, e),
        }
        match self.last_update() {
            Some(at) => info!("[{}] 上次成功更新: {}", self.name, at.format("%Y-%m-%d %H:%M:%S")),
            None => warn!("[{}] 尚未成功更新过", self.name),
        }
    }

    pub async fn run_with(&mut self, tree: &mut dyn RemoteTree) -> Result<RunSummary> {
        info!("[{}] 开始检查 {}{}", self.name, tree.name(), self.root_path);

        let scanned = self.scan(tree).await;
        let mut alerts = self.walker.take_alerts();
        let (mut snapshot, changes) = match scanned {
            Ok(scanned) => scanned,
            Err(e) => {
                self.fail(alerts, &e).await;
                return Err(e);
            }
        };

        let deleted = snapshot.sweep();
        for path in &deleted {
            info!("- {} deleted", truncate_left(path, LOG_PATH_WIDTH));
        }

        let saved = snapshot.save(&self.snapshot_path);
        if let Err(e) = &saved {
            error!("[{}] {}", self.name, e);
            alerts.push(Alert::error(format!("{}: {}", self.name, e)));
        }

        let mut summary = RunSummary {
            files: snapshot.len(),
            new_files: changes.new_files.len(),
            size_changed: changes.size_changed.len(),
            date_changed: changes.date_changed.len(),
            deleted: deleted.len(),
            messages: 0,
        };
        let line = format!(
            "{}: {} files, {} changes, {} deleted",
            self.name,
            summary.files,
            changes.total(),
            summary.deleted
        );
        info!("{}", line);
        alerts.push(Alert::new(Level::INFO, line));

        summary.messages = self.notify(&alerts, Some((&changes, &deleted))).await;

        saved.with_context(|| format!("target {} not saved", self.name))?;
        self.board.record(&self.name, Local::now());
        Ok(summary)
    }

    /// 加载快照并遍历；无论遍历结果如何都断开连接
    async fn scan(&mut self, tree: &mut dyn RemoteTree) -> Result<(Snapshot, ChangeSet)> {
        let mut snapshot = Snapshot::load(&self.snapshot_path)?;
        debug!("[{}] 快照中有 {} 条记录", self.name, snapshot.len());

        tree.connect()
            .await
            .with_context(|| format!("cannot connect to {}", tree.name()))?;
        let walked = self.walk_root(tree, &mut snapshot).await;
        tree.disconnect().await;

        Ok((snapshot, walked?))
    }

    async fn walk_root(
        &mut self,
        tree: &mut dyn RemoteTree,
        snapshot: &mut Snapshot,
    ) -> Result<ChangeSet> {
        tree.change_dir(&self.root_path)
            .await
            .with_context(|| format!("cannot enter root path {}", self.root_path))?;

        let mut changes = ChangeSet::new();
        self.walker.walk(tree, snapshot, &mut changes).await?;
        Ok(changes)
    }

    async fn fail(&self, mut alerts: Vec<Alert>, err: &anyhow::Error) {
        error!("[{}] {:#}", self.name, err);
        alerts.push(Alert::error(format!("{}: {:#}", self.name, err)));
        self.notify(&alerts, None).await;
    }

    /// 发送达到阈值的告警与变化报告，返回发出的消息数
    async fn notify(&self, alerts: &[Alert], report: Option<(&ChangeSet, &[String])>) -> usize {
        let mut buffer = MessageBuffer::new();
        render_alerts(&mut buffer, alerts, self.notify_level);
        if let Some((changes, deleted)) = report {
            render_changes(&mut buffer, changes, deleted, Local::now());
        }
        if buffer.is_empty() {
            return 0;
        }

        match buffer.send_to(self.notifier.as_ref()).await {
            Ok(count) => count,
            Err(e) => {
                error!("[{}] 发送通知失败 ({}): {}", self.name, self.notifier.name(), e);
                0
            }
        }
    }
}

/// 目标配置了 chatId 且存在 Bot 配置时走 Telegram，否则只写日志
pub fn build_notifier(
    config: &AppConfig,
    target: &TargetConfig,
) -> Result<Arc<dyn Notifier>, ConfigError> {
    match (&config.telegram, target.chat_id.as_deref()) {
        (Some(telegram), Some(chat_id)) if !chat_id.is_empty() => {
            let notifier = TelegramNotifier::new(&telegram.api_base, &telegram.bot_token, chat_id)
                .map_err(|e| ConfigError::Notifier {
                    target: target.name.clone(),
                    message: e.to_string(),
                })?;
            Ok(Arc::new(notifier))
        }
        _ => Ok(Arc::new(LogNotifier::new(&target.name))),
    }
}

/// 构建所有目标，配置有误的目标记录错误后跳过
pub fn build_targets(
    config: &AppConfig,
    config_dir: &Path,
    board: &Arc<UpdateBoard>,
) -> Vec<Target> {
    config
        .targets
        .iter()
        .filter_map(|target| {
            let built = build_notifier(config, target)
                .and_then(|notifier| Target::from_config(target, config_dir, notifier))
                .map(|t| t.with_board(board.clone()));
            match built {
                Ok(t) => {
                    info!("已加载目标: {} -> {}", t.name(), t.snapshot_path().display());
                    Some(t)
                }
                Err(e) => {
                    error!("跳过目标 {}: {}", target.name, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::storage::memory::MemoryTree;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn target_config(level: &str) -> TargetConfig {
        serde_json::from_value(serde_json::json!({
            "name": "media",
            "snapshotPath": "media.txt",
            "storage": { "type": "local", "path": "/unused" },
            "rootPath": "/root",
            "fileMask": "\\.mxf$",
            "notifyLevel": level
        }))
        .unwrap()
    }

    fn target(dir: &TempDir, level: &str) -> (Target, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let target =
            Target::from_config(&target_config(level), dir.path(), recorder.clone()).unwrap();
        (target, recorder)
    }

    #[tokio::test]
    async fn test_first_run_saves_and_reports() {
        let dir = TempDir::new().unwrap();
        let (mut target, recorder) = target(&dir, "warn");
        let mut tree = MemoryTree::new()
            .with_file("/root/a.mxf", 100, t(1))
            .with_file("/root/b.txt", 1, t(1));

        let summary = target.run_with(&mut tree).await.unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.new_files, 1);
        assert_eq!(summary.messages, 1);
        assert!(target.last_update().is_some());

        let saved = fs::read_to_string(dir.path().join("media.txt")).unwrap();
        assert_eq!(saved, "?{/root/a.mxf?}a.mxf?|100?|1970-01-01T00:00:01Z\n");

        let sent = recorder.take();
        assert!(sent[0].contains("*new files:*\n```\n/root/a.mxf\n```"));
        // info 级别的摘要不会转发
        assert!(!sent[0].contains("INF:"));
    }

    #[tokio::test]
    async fn test_unchanged_tree_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut target, recorder) = target(&dir, "warn");
        let mut tree = MemoryTree::new().with_file("/root/a.mxf", 100, t(1));
        target.run_with(&mut tree).await.unwrap();
        let first = fs::read(dir.path().join("media.txt")).unwrap();
        recorder.take();

        let summary = target.run_with(&mut tree).await.unwrap();

        assert_eq!(summary.changes(), 0);
        assert_eq!(summary.messages, 0);
        assert!(recorder.take().is_empty());
        assert_eq!(fs::read(dir.path().join("media.txt")).unwrap(), first);
    }

    #[tokio::test]
    async fn test_failed_walk_leaves_snapshot_untouched() {
        let dir = TempDir::new().unwrap();
        let (mut target, recorder) = target(&dir, "warn");
        let files = [("/root/a/x.mxf", 1u64), ("/root/b/y.mxf", 2), ("/root/c/z.mxf", 3)];
        let mut tree = files
            .iter()
            .fold(MemoryTree::new(), |tree, (p, s)| tree.with_file(p, *s, t(1)));
        target.run_with(&mut tree).await.unwrap();
        let before = fs::read(dir.path().join("media.txt")).unwrap();
        recorder.take();

        // b 目录被删，新增 d 目录，但在列出第二个目录后连接断开
        let mut broken = MemoryTree::new()
            .with_file("/root/a/x.mxf", 10, t(2))
            .with_file("/root/c/z.mxf", 3, t(1))
            .with_file("/root/d/w.mxf", 4, t(1))
            .fail_after_lists(2);
        let err = target.run_with(&mut broken).await.unwrap_err();

        assert!(format!("{:#}", err).contains("connection reset"));
        assert_eq!(fs::read(dir.path().join("media.txt")).unwrap(), before);
        let sent = recorder.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("ERR: media: list: connection reset by peer"));
        assert!(!sent[0].contains("*deleted:*"));
    }

    #[tokio::test]
    async fn test_missing_root_path_fails() {
        let dir = TempDir::new().unwrap();
        let (mut target, _recorder) = target(&dir, "error");
        let mut tree = MemoryTree::new().with_file("/other/a.mxf", 1, t(1));

        let err = target.run_with(&mut tree).await.unwrap_err();

        assert!(format!("{:#}", err).contains("cannot enter root path /root"));
        assert!(target.last_update().is_none());
        assert_eq!(fs::read_to_string(dir.path().join("media.txt")).unwrap(), "");
    }

    #[tokio::test]
    async fn test_alerts_routed_by_level() {
        let tree = || {
            MemoryTree::new()
                .with_file("/root/open/a.mxf", 1, t(1))
                .with_file("/root/secret/b.mxf", 1, t(1))
                .deny("/root/secret")
        };

        let dir = TempDir::new().unwrap();
        let (mut warn_target, warn_recorder) = target(&dir, "warn");
        warn_target.run_with(&mut tree()).await.unwrap();
        let sent = warn_recorder.take().concat();
        assert!(sent.contains("WRN: cd /root/: 550 permission denied"));
        assert!(!sent.contains("INF:"));

        let dir = TempDir::new().unwrap();
        let (mut error_target, error_recorder) = target(&dir, "error");
        error_target.run_with(&mut tree()).await.unwrap();
        let sent = error_recorder.take().concat();
        assert!(!sent.contains("WRN:"));
        assert!(sent.contains("/root/open/a.mxf"));

        let dir = TempDir::new().unwrap();
        let (mut info_target, info_recorder) = target(&dir, "info");
        info_target.run_with(&mut tree()).await.unwrap();
        let sent = info_recorder.take().concat();
        assert!(sent.contains("INF: media: 1 files, 1 changes, 0 deleted"));
    }

    #[tokio::test]
    async fn test_deleted_files_reported() {
        let dir = TempDir::new().unwrap();
        let (mut target, recorder) = target(&dir, "warn");
        let mut tree = MemoryTree::new()
            .with_file("/root/a.mxf", 1, t(1))
            .with_file("/root/b.mxf", 1, t(1));
        target.run_with(&mut tree).await.unwrap();
        recorder.take();

        tree.remove_file("/root/b.mxf");
        let summary = target.run_with(&mut tree).await.unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.files, 1);
        assert!(recorder.take()[0].contains("*deleted:*\n```\n/root/b.mxf\n```"));
    }

    #[test]
    fn test_build_targets_skips_invalid() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "targets": [
                {
                    "name": "good",
                    "snapshotPath": "good.txt",
                    "storage": { "type": "local", "path": "/srv" }
                },
                {
                    "name": "bad-pattern",
                    "snapshotPath": "bad.txt",
                    "storage": { "type": "local", "path": "/srv" },
                    "fileMask": "(unclosed"
                },
                {
                    "name": "no-endpoint",
                    "snapshotPath": "ftp.txt",
                    "storage": { "type": "ftp" }
                }
            ]
        }))
        .unwrap();

        let board = Arc::new(UpdateBoard::default());
        let targets = build_targets(&config, Path::new("/etc/ftpwatch"), &board);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name(), "good");
        assert_eq!(targets[0].snapshot_path(), Path::new("/etc/ftpwatch/good.txt"));
        assert!(board.for_chat("-1").is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_updates_shared_board() {
        let dir = TempDir::new().unwrap();
        let board = Arc::new(UpdateBoard::default());
        let mut config = target_config("warn");
        config.chat_id = Some("-100500".to_string());
        let recorder = Arc::new(Recorder::default());
        let mut target = Target::from_config(&config, dir.path(), recorder)
            .unwrap()
            .with_board(board.clone());
        assert_eq!(board.for_chat("-100500"), vec![("media".to_string(), None)]);

        let mut denied = MemoryTree::new().with_file("/other/a.mxf", 1, t(1));
        target.run_with(&mut denied).await.unwrap_err();
        assert!(board.last_update("media").is_none());

        let mut tree = MemoryTree::new().with_file("/root/a.mxf", 1, t(1));
        target.run_with(&mut tree).await.unwrap();

        let at = board.last_update("media").unwrap();
        assert_eq!(target.last_update(), Some(at));
        let reply = crate::notify::bot::answer("/lastupdate", "-100500", &board).unwrap();
        assert_eq!(reply, format!("media: {}", at.format("%Y-%m-%d %H:%M:%S")));
    }

    #[test]
    fn test_notifier_selection() {
        let mut config = AppConfig::parse(r#"{ "telegram": { "botToken": "1:x" } }"#).unwrap();
        let mut target = target_config("warn");

        assert_eq!(build_notifier(&config, &target).unwrap().name(), "log:media");

        target.chat_id = Some("42".to_string());
        assert_eq!(build_notifier(&config, &target).unwrap().name(), "telegram:42");

        config.telegram = None;
        assert_eq!(build_notifier(&config, &target).unwrap().name(), "log:media");
    }
}
