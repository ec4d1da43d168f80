//! 远程文件快照 - 记录上次观察到的文件元数据
//!
//! 每行一条记录：`?{<path>?}<name>?|<size>?|<modifiedAt>`，按行排序写出。

use crate::storage::RemoteEntry;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\?\{(.*)\?\}(.*)\?\|(\d+)\?\|(.*)$").expect("snapshot line pattern is valid")
});

/// 字段中不允许出现的分隔符
const FIELD_TOKENS: [&str; 3] = ["?{", "?}", "?|"];

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to create snapshot {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to back up snapshot to {}: {source}", path.display())]
    Backup { path: PathBuf, source: io::Error },
    #[error("failed to write snapshot {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("wrong input in snapshot ({0})")]
    Malformed(String),
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
    #[error("field contains a separator token: {0:?}")]
    UnsafeField(String),
}

/// 单个远程文件的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// 本轮遍历中是否再次见到，不持久化
    pub seen: bool,
}

impl FileRecord {
    /// 本轮新观察到的文件
    pub fn observed(path: String, entry: &RemoteEntry) -> Self {
        Self {
            path,
            name: entry.name.clone(),
            size: entry.size,
            modified_at: entry.modified_at,
            seen: true,
        }
    }

    /// 用新的元数据覆盖旧值
    pub fn update(&mut self, entry: &RemoteEntry) {
        self.name = entry.name.clone();
        self.size = entry.size;
        self.modified_at = entry.modified_at;
        self.seen = true;
    }

    pub fn encode_line(&self) -> Result<String, SnapshotError> {
        for field in [&self.path, &self.name] {
            if !is_storable(field) {
                return Err(SnapshotError::UnsafeField(field.clone()));
            }
        }

        Ok(format!(
            "?{{{}?}}{}?|{}?|{}",
            self.path,
            self.name,
            self.size,
            self.modified_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ))
    }

    pub fn parse_line(line: &str) -> Result<Self, SnapshotError> {
        let caps = LINE_RE
            .captures(line)
            .ok_or_else(|| SnapshotError::Malformed(line.to_string()))?;

        let size = caps[3]
            .parse::<u64>()
            .map_err(|_| SnapshotError::Malformed(line.to_string()))?;
        let modified_at = DateTime::parse_from_rfc3339(&caps[4])
            .map_err(|source| SnapshotError::Timestamp {
                value: caps[4].to_string(),
                source,
            })?
            .with_timezone(&Utc);

        Ok(Self {
            path: caps[1].to_string(),
            name: caps[2].to_string(),
            size,
            modified_at,
            seen: false,
        })
    }
}

/// 路径到文件记录的映射
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: HashMap<String, FileRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载快照；文件不存在时创建空文件并返回空快照
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        debug!("加载快照: {}", path.display());

        if !path.exists() {
            info!("快照不存在，创建空快照: {}", path.display());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| SnapshotError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            fs::File::create(path).map_err(|source| SnapshotError::Create {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(Self::default());
        }

        let content = fs::read(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = Self::parse_bytes(&content);
        debug!("快照已加载: {} 条记录", snapshot.len());
        Ok(snapshot)
    }

    /// 逐行解析，错误行记录日志后跳过
    pub fn parse(content: &str) -> Self {
        Self::parse_bytes(content.as_bytes())
    }

    /// 按字节拆行，不是合法 UTF-8 的行同样记录日志后跳过
    pub fn parse_bytes(content: &[u8]) -> Self {
        let mut files = HashMap::new();
        for (index, raw) in content.split(|b| *b == b'\n').enumerate() {
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    error!("wrong input in snapshot (line {}: {})", index + 1, e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match FileRecord::parse_line(line) {
                Ok(record) => {
                    files.insert(record.path.clone(), record);
                }
                Err(e) => error!("{}", e),
            }
        }
        Self { files }
    }

    /// 编码为文本，含分隔符的记录会被跳过
    pub fn encode(&self) -> String {
        let mut lines: Vec<String> = self
            .files
            .values()
            .filter_map(|record| match record.encode_line() {
                Ok(line) => Some(line),
                Err(e) => {
                    error!("跳过无法写入的记录 {}: {}", record.path, e);
                    None
                }
            })
            .collect();
        lines.sort();

        let mut out = String::new();
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// 保存快照：先备份旧文件，写入成功后删除备份；失败时备份保留
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let content = self.encode();

        let backup = path.exists().then(|| backup_path(path));
        if let Some(backup) = &backup {
            fs::copy(path, backup).map_err(|source| SnapshotError::Backup {
                path: backup.clone(),
                source,
            })?;
        }

        let temp = with_suffix(path, ".tmp");
        let written = fs::write(&temp, content).and_then(|_| fs::rename(&temp, path));
        if let Err(source) = written {
            let _ = fs::remove_file(&temp);
            return Err(SnapshotError::Write {
                path: path.to_path_buf(),
                source,
            });
        }

        if let Some(backup) = &backup {
            if let Err(e) = fs::remove_file(backup) {
                warn!("删除快照备份 {} 失败: {}", backup.display(), e);
            }
        }

        debug!("快照已保存: {} 条记录 -> {}", self.len(), path.display());
        Ok(())
    }

    /// 删除本轮未见到的记录并返回其路径（已排序），其余记录的标记复位
    pub fn sweep(&mut self) -> Vec<String> {
        let mut deleted = Vec::new();
        self.files.retain(|path, record| {
            if record.seen {
                record.seen = false;
                true
            } else {
                deleted.push(path.clone());
                false
            }
        });
        deleted.sort();
        deleted
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileRecord> {
        self.files.get_mut(path)
    }

    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.path.clone(), record)
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }
}

/// 不含分隔符和换行的字段才能写入快照
pub fn is_storable(field: &str) -> bool {
    !field.contains(['\n', '\r']) && !FIELD_TOKENS.iter().any(|t| field.contains(t))
}

/// `<path><YYYYMMDDhhmmss>`
fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, &Local::now().format("%Y%m%d%H%M%S").to_string())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
