//! 事件通知端口
//!
//! 通知是单向、尽力而为的：调用方不等待结果，任何失败都在这里被吞掉，
//! 不会影响协议处理。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// 通知端口
pub trait Notifier: Send + Sync {
    /// 发送一条人类可读的事件，不返回任何结果
    fn notify(&self, source: &str, text: &str);
}

/// 通知事件数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    pub source: String,
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(source: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            msg: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _source: &str, _text: &str) {}
}

/// 通过HTTP POST把事件推送到Web监控面板
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpNotifier {
    /// 创建新的HTTP通知器
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, source: &str, text: &str) {
        // 不在tokio运行时内时直接丢弃
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime, dropping notification from {}", source);
                return;
            }
        };

        let event = NotificationEvent::new(source, text);
        let request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("User-Agent", "RadLink-Notifier/1.0")
            .json(&event);
        let url = self.url.clone();

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Delivered notification {} to {}", event.id, url);
                }
                Ok(response) => {
                    debug!("Notification sink {} answered {}", url, response.status());
                }
                Err(e) => {
                    debug!("Failed to deliver notification to {}: {}", url, e);
                }
            }
        });
    }
}
