//! HIS / RIS 对等端组装
//!
//! 每个对等端由一个监听器和一个主动发送的任务组成：
//! HIS 运行脚本会话，RIS 运行结果扫描器。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use radlink_core::{LinkError, Result};
use radlink_integration::{FacilityConfig, MessageBuilder, Notifier};
use radlink_mllp::{ListenerConfig, MllpClient, MllpServer, DEFAULT_MAX_FRAME_LENGTH};
use tracing::{info, warn};

use crate::delay::delay_for;
use crate::dispatcher::Dispatcher;
use crate::initiator::InitiatorSession;
use crate::ledger::OrderLedger;
use crate::scanner::ResultScanner;

/// 对等端运行参数
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub listener: ListenerConfig,
    pub counterpart_address: String,       // 对端 host:port
    pub client_timeout: Option<Duration>,  // 发送超时，None 表示不限
    pub max_frame_length: usize,
    pub scan_interval: Duration,           // 仅RIS
    pub step_delay: Duration,              // 演示节奏
    pub run_script: bool,                  // 仅HIS
    pub facility: FacilityConfig,
}

impl PeerSettings {
    /// HIS默认参数：监听6661，对端6662
    pub fn initiator() -> Self {
        Self {
            listener: ListenerConfig {
                port: 6661,
                ..Default::default()
            },
            counterpart_address: "127.0.0.1:6662".to_string(),
            client_timeout: Some(Duration::from_secs(10)),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            scan_interval: Duration::from_secs(2),
            step_delay: Duration::ZERO,
            run_script: true,
            facility: FacilityConfig::his(),
        }
    }

    /// RIS默认参数：监听6662，对端6661
    pub fn responder() -> Self {
        Self {
            listener: ListenerConfig {
                port: 6662,
                ..Default::default()
            },
            counterpart_address: "127.0.0.1:6661".to_string(),
            run_script: false,
            facility: FacilityConfig::ris(),
            ..Self::initiator()
        }
    }

    fn client(&self) -> MllpClient {
        MllpClient::new()
            .with_timeout(self.client_timeout)
            .with_max_frame_length(self.max_frame_length)
    }
}

/// HIS端
pub struct InitiatorPeer {
    settings: PeerSettings,
    server: MllpServer,
    notifier: Arc<dyn Notifier>,
}

impl InitiatorPeer {
    pub async fn bind(settings: PeerSettings, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let server = MllpServer::bind(settings.listener.clone()).await?;
        Ok(Self {
            settings,
            server,
            notifier,
        })
    }

    pub fn with_counterpart(mut self, address: impl Into<String>) -> Self {
        self.settings.counterpart_address = address.into();
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    pub fn session(&self) -> InitiatorSession {
        InitiatorSession::new(
            self.settings.client(),
            self.settings.counterpart_address.clone(),
            MessageBuilder::new(self.settings.facility.clone()),
            Arc::clone(&self.notifier),
        )
        .with_delay(delay_for(self.settings.step_delay))
    }

    /// 启动监听器，按需运行脚本，然后持续接收结果
    pub async fn run(self) -> Result<()> {
        let session = self.session();
        let dispatcher = Dispatcher::initiator(
            MessageBuilder::new(self.settings.facility.clone()),
            Arc::clone(&self.notifier),
        );
        info!("HIS listening on {}", self.server.local_addr()?);
        self.notifier.notify("HIS", "HIS simulator started");

        let listener = tokio::spawn(self.server.serve(Arc::new(dispatcher)));

        if self.settings.run_script {
            let report = session.run_script().await;
            if !report.all_accepted() {
                warn!(
                    "Only {}/{} messages were accepted by RIS",
                    report.accepted(),
                    report.steps.len()
                );
            }
        }

        listener
            .await
            .map_err(|e| LinkError::Internal(format!("listener task failed: {}", e)))
    }
}

/// RIS端
pub struct ResponderPeer {
    settings: PeerSettings,
    server: MllpServer,
    ledger: Arc<OrderLedger>,
    notifier: Arc<dyn Notifier>,
}

impl ResponderPeer {
    pub async fn bind(settings: PeerSettings, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let server = MllpServer::bind(settings.listener.clone()).await?;
        Ok(Self {
            settings,
            server,
            ledger: Arc::new(OrderLedger::new()),
            notifier,
        })
    }

    pub fn with_counterpart(mut self, address: impl Into<String>) -> Self {
        self.settings.counterpart_address = address.into();
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    pub fn ledger(&self) -> Arc<OrderLedger> {
        Arc::clone(&self.ledger)
    }

    /// 启动监听器与结果扫描器，直到进程退出
    pub async fn run(self) -> Result<()> {
        let dispatcher = Dispatcher::responder(
            MessageBuilder::new(self.settings.facility.clone()),
            Arc::clone(&self.ledger),
            Arc::clone(&self.notifier),
        );
        let scanner = ResultScanner::new(
            Arc::clone(&self.ledger),
            self.settings.client(),
            self.settings.counterpart_address.clone(),
            MessageBuilder::new(self.settings.facility.clone()),
            Arc::clone(&self.notifier),
        )
        .with_interval(self.settings.scan_interval)
        .with_delay(delay_for(self.settings.step_delay));

        info!("RIS listening on {}", self.server.local_addr()?);
        self.notifier.notify("RIS", "RIS simulator started");

        let listener = tokio::spawn(self.server.serve(Arc::new(dispatcher)));
        let scanner = tokio::spawn(scanner.run());

        tokio::select! {
            result = listener => result,
            result = scanner => result,
        }
        .map_err(|e| LinkError::Internal(format!("peer task failed: {}", e)))
    }
}
