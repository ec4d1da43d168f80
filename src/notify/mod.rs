//! 通知发送 - 消息缓冲、分段与发送接口

pub mod bot;
pub mod telegram;

use async_trait::async_trait;
use tracing::info;

pub use telegram::TelegramNotifier;

/// Telegram 单条消息的最大长度
pub const DEFAULT_MESSAGE_LIMIT: usize = 4096;

const FENCE: &str = "```";
/// 续接消息时重新打开代码块
const FENCE_REOPEN: &str = "```\n";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("message rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// 通知接口
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送一条消息（长度已在限制内）
    async fn send(&self, text: &str) -> Result<(), NotifyError>;

    /// 单条消息的最大字符数
    fn message_limit(&self) -> usize {
        DEFAULT_MESSAGE_LIMIT
    }

    fn name(&self) -> &str;
}

/// 没有配置消息通道时，通知只写入日志
#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(target: &str) -> Self {
        Self {
            name: format!("log:{}", target),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!("[{}] 通知内容:\n{}", self.name, text);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 待发送的文本片段
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    fragments: Vec<String>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn text(&self) -> String {
        self.fragments.concat()
    }

    /// 按长度限制切分成多条消息
    ///
    /// 切分点落在代码块内部时，前一条消息补上结束标记，后一条重新打开代码块，
    /// 保证每条消息中的 ``` 成对出现。片段本身不会被拆开，除非单个片段超过限制。
    pub fn split(&self, limit: usize) -> Vec<String> {
        // 为结束标记预留空间
        let budget = limit.saturating_sub(FENCE.len()).max(FENCE_REOPEN.len() + 1);
        let piece_limit = budget - FENCE_REOPEN.len();

        let mut messages = Vec::new();
        let mut text = String::new();
        let mut text_len = 0;
        let mut in_fence = false;

        for fragment in self.fragments.iter().flat_map(|f| hard_wrap(f, piece_limit)) {
            let len = fragment.chars().count();
            if !text.is_empty() && text_len + len > budget {
                if in_fence {
                    text.push_str(FENCE);
                }
                messages.push(std::mem::take(&mut text));
                text_len = 0;
                if in_fence {
                    text.push_str(FENCE_REOPEN);
                    text_len = FENCE_REOPEN.len();
                }
            }

            if fragment.matches(FENCE).count() % 2 == 1 {
                in_fence = !in_fence;
            }
            text.push_str(&fragment);
            text_len += len;
        }

        if !text.is_empty() {
            messages.push(text);
        }
        messages
    }

    /// 分段后逐条发送，遇到第一个错误即停止
    pub async fn send_to(&self, notifier: &dyn Notifier) -> Result<usize, NotifyError> {
        let messages = self.split(notifier.message_limit());
        for message in &messages {
            notifier.send(message).await?;
        }
        Ok(messages.len())
    }
}

/// 超长片段按字符切开，切分点不落在连续的反引号中间
fn hard_wrap(fragment: &str, limit: usize) -> Vec<String> {
    if fragment.chars().count() <= limit {
        return vec![fragment.to_string()];
    }
    let chars: Vec<char> = fragment.chars().collect();
    let limit = limit.max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            let mut cut = end;
            while cut > start && chars[cut - 1] == '`' && chars[cut] == '`' {
                cut -= 1;
            }
            if cut > start {
                end = cut;
            }
        }
        pieces.push(chars[start..end].iter().collect());
        start = end;
    }
    pieces
}
