use super::{Notifier, NotifyError, DEFAULT_MESSAGE_LIMIT};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// 请求超时（秒）
pub(super) const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
pub(super) struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'a str>,
    pub disable_web_page_preview: bool,
}

/// 通过 Bot API 发送到指定聊天
pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
    name: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, bot_token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
            name: format!("telegram:{}", chat_id),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: Some("Markdown"),
            disable_web_page_preview: false,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("已发送消息到 {} ({} 字符)", self.name, text.chars().count());
        Ok(())
    }

    fn message_limit(&self) -> usize {
        DEFAULT_MESSAGE_LIMIT
    }

    fn name(&self) -> &str {
        &self.name
    }
}
