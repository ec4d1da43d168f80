//! 文件/目录过滤

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 过滤规则（正则表达式原文）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMasks {
    /// 文件名需匹配（为空表示不限制）
    #[serde(default)]
    pub file_mask: Option<String>,
    /// 文件名匹配则排除
    #[serde(default)]
    pub file_mask_ignore: Option<String>,
    /// 目录完整路径需匹配
    #[serde(default)]
    pub folder_mask: Option<String>,
    /// 目录完整路径匹配则跳过
    #[serde(default)]
    pub folder_mask_ignore: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {field} pattern {pattern:?}: {source}")]
pub struct PatternError {
    pub field: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// 编译后的过滤器
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    file_include: Option<Regex>,
    file_exclude: Option<Regex>,
    folder_include: Option<Regex>,
    folder_exclude: Option<Regex>,
}

fn compile(field: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, PatternError> {
    match pattern {
        None | Some("") => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|source| PatternError {
            field,
            pattern: p.to_string(),
            source,
        }),
    }
}

impl PathFilter {
    pub fn new(masks: &FilterMasks) -> Result<Self, PatternError> {
        Ok(Self {
            file_include: compile("fileMask", masks.file_mask.as_deref())?,
            file_exclude: compile("fileMaskIgnore", masks.file_mask_ignore.as_deref())?,
            folder_include: compile("folderMask", masks.folder_mask.as_deref())?,
            folder_exclude: compile("folderMaskIgnore", masks.folder_mask_ignore.as_deref())?,
        })
    }

    pub fn accept_file(&self, name: &str) -> bool {
        matches(&self.file_include, name, true) && !matches(&self.file_exclude, name, false)
    }

    /// `dir` 为带结尾斜杠的当前目录
    pub fn descend_into(&self, dir: &str, name: &str) -> bool {
        if name == "." || name == ".." {
            return false;
        }
        let full = format!("{}{}", dir, name);
        matches(&self.folder_include, &full, true) && !matches(&self.folder_exclude, &full, false)
    }
}

fn matches(re: &Option<Regex>, candidate: &str, when_absent: bool) -> bool {
    re.as_ref().map_or(when_absent, |re| re.is_match(candidate))
}
