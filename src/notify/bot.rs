//! Telegram 机器人命令
//!
//! 通过 `getUpdates` 长轮询接收消息，回答两条命令：
//! `/chatid` 返回当前聊天的 ID，`/lastupdate` 返回绑定到该聊天的目标上次成功更新的时间。

use super::telegram::{SendMessage, REQUEST_TIMEOUT_SECS};
use super::NotifyError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 长轮询等待时间（秒）
const LONG_POLL_SECS: u64 = 20;
/// 轮询出错后的重试间隔（秒）
const RETRY_SECS: u64 = 5;

#[derive(Debug, Clone)]
struct BoardEntry {
    target: String,
    chat_id: Option<String>,
    last_update: Option<DateTime<Local>>,
}

/// 各目标上次成功更新的时间，由任务写入、机器人读取
#[derive(Debug, Default)]
pub struct UpdateBoard {
    entries: RwLock<Vec<BoardEntry>>,
}

impl UpdateBoard {
    /// 登记目标，重复登记只更新聊天 ID
    pub fn register(&self, target: &str, chat_id: Option<&str>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let chat_id = chat_id.map(str::to_string);
        match entries.iter_mut().find(|e| e.target == target) {
            Some(entry) => entry.chat_id = chat_id,
            None => entries.push(BoardEntry {
                target: target.to_string(),
                chat_id,
                last_update: None,
            }),
        }
    }

    pub fn record(&self, target: &str, at: DateTime<Local>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.iter_mut().find(|e| e.target == target) {
            entry.last_update = Some(at);
        }
    }

    pub fn last_update(&self, target: &str) -> Option<DateTime<Local>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.target == target)
            .and_then(|e| e.last_update)
    }

    /// 绑定到该聊天的目标及其更新时间，按登记顺序
    pub fn for_chat(&self, chat_id: &str) -> Vec<(String, Option<DateTime<Local>>)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.chat_id.as_deref() == Some(chat_id))
            .map(|e| (e.target.clone(), e.last_update))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

/// 生成命令的回复，非命令或无关命令返回 None
pub fn answer(text: &str, chat_id: &str, board: &UpdateBoard) -> Option<String> {
    let word = text.split_whitespace().next()?;
    // 群聊里的命令形如 /lastupdate@some_bot
    let command = word.split('@').next().unwrap_or(word);

    match command {
        "/chatid" => Some(chat_id.to_string()),
        "/lastupdate" => {
            let targets = board.for_chat(chat_id);
            if targets.is_empty() {
                return Some("no targets report to this chat".to_string());
            }
            let lines: Vec<String> = targets
                .into_iter()
                .map(|(name, at)| match at {
                    Some(at) => format!("{}: {}", name, at.format("%Y-%m-%d %H:%M:%S")),
                    None => format!("{}: never", name),
                })
                .collect();
            Some(lines.join("\n"))
        }
        _ => None,
    }
}

pub struct TelegramBot {
    client: reqwest::Client,
    base: String,
    offset: i64,
}

impl TelegramBot {
    pub fn new(api_base: &str, bot_token: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token),
            offset: 0,
        })
    }

    async fn get_updates(&mut self) -> Result<Vec<Update>, NotifyError> {
        let body = GetUpdates {
            offset: self.offset,
            timeout: LONG_POLL_SECS,
            allowed_updates: &["message"],
        };
        let url = format!("{}/getUpdates", self.base);

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let parsed: ApiResponse<Vec<Update>> = response.json().await?;
        if !parsed.ok {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: parsed.description.unwrap_or_default(),
            });
        }

        let updates = parsed.result.unwrap_or_default();
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset = last + 1;
        }
        Ok(updates)
    }

    async fn reply(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: None,
            disable_web_page_preview: true,
        };
        let url = format!("{}/sendMessage", self.base);

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn handle(&self, update: Update, board: &UpdateBoard) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id.to_string();
        let Some(reply) = answer(text, &chat_id, board) else {
            return;
        };

        debug!("回复聊天 {}: {}", chat_id, text);
        if let Err(e) = self.reply(&chat_id, &reply).await {
            warn!("回复聊天 {} 失败: {}", chat_id, e);
        }
    }

    /// 持续轮询直到任务被取消
    pub async fn run(mut self, board: Arc<UpdateBoard>) {
        info!("Telegram 机器人开始接收命令");
        loop {
            match self.get_updates().await {
                Ok(updates) => {
                    for update in updates {
                        self.handle(update, &board).await;
                    }
                }
                Err(e) => {
                    warn!("获取 Telegram 更新失败: {}", e);
                    tokio::time::sleep(Duration::from_secs(RETRY_SECS)).await;
                }
            }
        }
    }
}
