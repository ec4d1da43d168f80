//! 通知内容：变化报告与告警行

use crate::core::ChangeSet;
use crate::notify::MessageBuffer;
use chrono::{DateTime, Local};
use tracing::Level;

/// 日志中路径的显示宽度
pub const LOG_PATH_WIDTH: usize = 64;

/// 一次运行中需要转发到通知的日志事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: Level,
    pub message: String,
    pub at: DateTime<Local>,
}

impl Alert {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Local::now(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Level::WARN, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::ERROR, message)
    }

    /// 不低于阈值严重程度的告警才会转发
    pub fn reaches(&self, threshold: Level) -> bool {
        self.level <= threshold
    }

    pub fn render(&self) -> String {
        let tag = match self.level {
            Level::ERROR => "ERR",
            Level::WARN => "WRN",
            Level::INFO => "INF",
            Level::DEBUG => "DBG",
            Level::TRACE => "TRC",
        };
        format!(
            "{} {}: {}\n",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            tag,
            self.message
        )
    }
}

/// 写入达到阈值的告警，放在代码块中，路径里的 `_` 和 `*` 不会被当作 Markdown 标记
pub fn render_alerts(buffer: &mut MessageBuffer, alerts: &[Alert], threshold: Level) {
    let mut routed = alerts.iter().filter(|a| a.reaches(threshold)).peekable();
    if routed.peek().is_none() {
        return;
    }

    buffer.push("```\n");
    for alert in routed {
        buffer.push(alert.render().replace('`', "'"));
    }
    buffer.push("```\n");
}

/// 写入变化报告；没有任何变化时不写入
pub fn render_changes(
    buffer: &mut MessageBuffer,
    changes: &ChangeSet,
    deleted: &[String],
    now: DateTime<Local>,
) {
    if !changes.any_found() && deleted.is_empty() {
        return;
    }

    buffer.push(now.format("*%Y-%m-%d %H:%M:%S*").to_string());
    push_section(buffer, "new files", &changes.new_files);
    push_section(buffer, "changed size", &changes.size_changed);
    push_section(buffer, "changed datetime", &changes.date_changed);
    push_section(buffer, "deleted", deleted);
}

fn push_section(buffer: &mut MessageBuffer, title: &str, paths: &[String]) {
    if paths.is_empty() {
        return;
    }
    buffer.push(format!("\n*{}:*\n```\n", title));
    for path in paths {
        buffer.push(format!("{}\n", path));
    }
    buffer.push("```\n");
}

/// 从左侧截断到 `width` 个字符，用于日志行
pub fn truncate_left(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count <= width {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count + 1 - width.max(1)).collect();
    format!("…{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_nothing_to_report() {
        let mut buffer = MessageBuffer::new();
        render_changes(&mut buffer, &ChangeSet::new(), &[], now());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_render_sections() {
        let mut changes = ChangeSet::new();
        changes.add_new("/root/a.mxf".to_string());
        changes.add_date_changed("/root/b.mxf".to_string());

        let mut buffer = MessageBuffer::new();
        render_changes(&mut buffer, &changes, &["/root/c.mxf".to_string()], now());

        assert_eq!(
            buffer.text(),
            "*2024-05-06 07:08:09*\
             \n*new files:*\n```\n/root/a.mxf\n```\n\
             \n*changed datetime:*\n```\n/root/b.mxf\n```\n\
             \n*deleted:*\n```\n/root/c.mxf\n```\n"
        );
    }

    #[test]
    fn test_deleted_only() {
        let mut buffer = MessageBuffer::new();
        render_changes(&mut buffer, &ChangeSet::new(), &["/x".to_string()], now());

        let text = buffer.text();
        assert!(text.starts_with("*2024-05-06 07:08:09*"));
        assert!(text.contains("*deleted:*"));
        assert!(!text.contains("new files"));
    }

    #[test]
    fn test_alert_threshold() {
        let warn = Alert::warn("cd failed");
        let error = Alert::error("connection lost");

        assert!(error.reaches(Level::WARN));
        assert!(warn.reaches(Level::WARN));
        assert!(!warn.reaches(Level::ERROR));
        assert!(warn.render().contains("WRN: cd failed"));
    }

    #[test]
    fn test_alerts_are_fenced() {
        let mut alert = Alert::warn("cd /AMEDIATEKA/ANIMALS_2/: 550 `denied`");
        alert.at = now();
        let alerts = vec![alert, Alert::new(Level::INFO, "summary")];

        let mut buffer = MessageBuffer::new();
        render_alerts(&mut buffer, &alerts, Level::WARN);

        assert_eq!(
            buffer.text(),
            "```\n2024-05-06 07:08:09 WRN: cd /AMEDIATEKA/ANIMALS_2/: 550 'denied'\n```\n"
        );

        let mut empty = MessageBuffer::new();
        render_alerts(&mut empty, &alerts, Level::ERROR);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_fenced_alerts_survive_split() {
        let alerts: Vec<Alert> = (0..20)
            .map(|i| Alert::warn(format!("cd /SHOW_{}/SEASON_1/: 550", i)))
            .collect();
        let mut buffer = MessageBuffer::new();
        render_alerts(&mut buffer, &alerts, Level::WARN);

        for message in buffer.split(160) {
            assert!(message.starts_with("```\n"), "{:?}", message);
            assert!(message.trim_end().ends_with("```"), "{:?}", message);
            assert_eq!(message.matches("```").count(), 2);
        }
    }

    #[test]
    fn test_truncate_left() {
        assert_eq!(truncate_left("/short", 64), "/short");
        assert_eq!(truncate_left("/abcdef", 4), "…def");
        assert_eq!(truncate_left("/путь/файл", 5).chars().count(), 5);
    }
}
