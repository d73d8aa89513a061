//! 结果扫描任务
//!
//! 周期性地为待处理申请生成 ORU^R01 发送给HIS。只有收到AA确认后申请
//! 才会转为 `ResultSent`，其他结果（拒绝、超时、连接中断）都保留 `Pending`
//! 留待下一轮。无法生成结果消息的申请被搁置，不再重试。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use radlink_core::utils::sequence_control_id;
use radlink_core::{LinkError, Order, PeerRole};
use radlink_integration::{MessageBuilder, Notifier, StudyReport};
use radlink_mllp::MllpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::delay::{DelayStrategy, NoDelay};
use crate::dispatcher::evaluate_acknowledgment;
use crate::ledger::OrderLedger;

/// 一轮扫描的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub delivered: usize, // 已被AA确认
    pub retained: usize,  // 发送失败或被拒绝，保持Pending
    pub skipped: usize,   // 无法构造消息，已搁置
}

impl ScanReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.retained + self.skipped
    }
}

/// 结果扫描器
pub struct ResultScanner {
    ledger: Arc<OrderLedger>,
    client: MllpClient,
    initiator_address: String,
    builder: MessageBuilder,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    delay: Arc<dyn DelayStrategy>,
    sequence: AtomicU32,
}

impl ResultScanner {
    pub fn new(
        ledger: Arc<OrderLedger>,
        client: MllpClient,
        initiator_address: impl Into<String>,
        builder: MessageBuilder,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            client,
            initiator_address: initiator_address.into(),
            builder,
            notifier,
            interval: Duration::from_secs(2),
            delay: Arc::new(NoDelay),
            sequence: AtomicU32::new(0),
        }
    }

    /// 两轮扫描之间的间隔
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 每次发送结果后的停顿
    pub fn with_delay(mut self, delay: Arc<dyn DelayStrategy>) -> Self {
        self.delay = delay;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 执行一轮扫描
    pub async fn scan_once(&self) -> ScanReport {
        let claimed = self.ledger.claim_pending().await;
        let mut report = ScanReport::default();
        if claimed.is_empty() {
            return report;
        }

        debug!("Scanning {} pending order(s)", claimed.len());
        for order in claimed {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let control_id = sequence_control_id("ORU", sequence);
            let study = StudyReport::for_descriptor(&order.study_descriptor);

            let message = match self.builder.build_oru_r01(
                &control_id,
                &order.order_id,
                order.patient.as_ref(),
                &study,
            ) {
                Ok(message) => message,
                Err(e) => {
                    error!("Skipping order {}: {}", order.order_id, e);
                    self.ledger.set_aside(&order.order_id).await;
                    report.skipped += 1;
                    continue;
                }
            };

            match self.deliver(&control_id, &order, &message).await {
                Ok(()) => {
                    self.ledger.complete(&order.order_id).await;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!("Result for order {} not delivered: {}", order.order_id, e);
                    self.ledger.release(&order.order_id).await;
                    report.retained += 1;
                }
            }
            self.delay.pause("result").await;
        }

        info!(
            "Scan finished: {} delivered, {} retained, {} skipped",
            report.delivered, report.retained, report.skipped
        );
        report
    }

    /// 发送一条结果并检查确认
    async fn deliver(&self, control_id: &str, order: &Order, message: &str) -> Result<(), LinkError> {
        info!(
            "Sending result {} for order {} to {}",
            control_id, order.order_id, self.initiator_address
        );
        self.notify(&format!("Result sent to HIS for order {}", order.order_id));

        let response = self
            .client
            .send(&self.initiator_address, message.as_bytes())
            .await?;

        match evaluate_acknowledgment(&response) {
            Ok(ack) => {
                info!("Result {} acknowledged: {}", control_id, ack.code);
                self.notify(&format!("ACK received from HIS: {}", ack.code));
                Ok(())
            }
            Err(e) => {
                self.notify(&format!("Result {} not accepted: {}", control_id, e));
                Err(e)
            }
        }
    }

    fn notify(&self, text: &str) {
        self.notifier.notify(PeerRole::Responder.label(), text);
    }

    /// 周期扫描，直到进程退出
    pub async fn run(self) {
        info!(
            "Result scanner started, delivering to {} every {:?}",
            self.initiator_address, self.interval
        );
        loop {
            self.scan_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}
