//! HIS端脚本会话
//!
//! 依次发送患者登记与两条检查申请，每条消息独占一个连接并等待确认。
//! 被拒绝的消息只上报，不重试。

use std::sync::Arc;

use radlink_core::{AckResult, LinkError, PatientDemographics, PeerRole, Result};
use radlink_integration::{MessageBuilder, Notifier, OrderRequest};
use radlink_mllp::MllpClient;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::delay::{DelayStrategy, NoDelay};
use crate::dispatcher::evaluate_acknowledgment;

/// 脚本中单个步骤的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub control_id: String,
    pub accepted: bool,
    pub detail: String,
}

/// 脚本运行结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptReport {
    pub steps: Vec<StepOutcome>,
}

impl ScriptReport {
    pub fn accepted(&self) -> usize {
        self.steps.iter().filter(|step| step.accepted).count()
    }

    pub fn all_accepted(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|step| step.accepted)
    }
}

/// HIS端会话
pub struct InitiatorSession {
    client: MllpClient,
    responder_address: String,
    builder: MessageBuilder,
    notifier: Arc<dyn Notifier>,
    delay: Arc<dyn DelayStrategy>,
    patient: PatientDemographics,
}

impl InitiatorSession {
    pub fn new(
        client: MllpClient,
        responder_address: impl Into<String>,
        builder: MessageBuilder,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            responder_address: responder_address.into(),
            builder,
            notifier,
            delay: Arc::new(NoDelay),
            patient: PatientDemographics::default(),
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn DelayStrategy>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_patient(mut self, patient: PatientDemographics) -> Self {
        self.patient = patient;
        self
    }

    pub fn patient(&self) -> &PatientDemographics {
        &self.patient
    }

    /// 发送 ADT^A04
    pub async fn register_patient(&self, control_id: &str) -> Result<AckResult> {
        let message = self.builder.build_adt_a04(control_id, &self.patient)?;
        info!(
            "Sending ADT^A04 {} for patient {}",
            control_id, self.patient.patient_id
        );
        self.notify(&format!(
            "Sending ADT^A04 for patient {} {}",
            self.patient.given_name, self.patient.family_name
        ));
        self.exchange(control_id, &message).await
    }

    /// 发送 OMI^O23
    pub async fn submit_order(&self, control_id: &str, order: &OrderRequest) -> Result<AckResult> {
        let message = self
            .builder
            .build_omi_o23(control_id, &self.patient, order)?;
        info!(
            "Sending OMI^O23 {} for order {} ({})",
            control_id, order.order_id, order.study_name
        );
        self.notify(&format!(
            "Sending order {}: {}",
            order.order_id, order.study_name
        ));
        self.exchange(control_id, &message).await
    }

    async fn exchange(&self, control_id: &str, message: &str) -> Result<AckResult> {
        let response = self
            .client
            .send(&self.responder_address, message.as_bytes())
            .await?;

        let ack = evaluate_acknowledgment(&response)?;
        info!("Message {} acknowledged: {}", control_id, ack.code);
        self.notify(&format!("ACK received: {}", ack.code));
        Ok(ack)
    }

    /// 运行完整脚本：ADT、胸部平片申请、胸部CT申请
    ///
    /// 某一步失败不会中止后续步骤。
    pub async fn run_script(&self) -> ScriptReport {
        let mut report = ScriptReport::default();

        let outcome = self.register_patient("MSG0001").await;
        report.steps.push(self.record("MSG0001", outcome));
        self.delay.pause("registration").await;

        let orders = [
            ("MSG0002", OrderRequest::chest_radiograph("ORD0001")),
            ("MSG0003", OrderRequest::chest_ct("ORD0002")),
        ];
        for (control_id, order) in orders.iter() {
            let outcome = self.submit_order(control_id, order).await;
            report.steps.push(self.record(control_id, outcome));
            self.delay.pause(&order.order_id).await;
        }

        info!(
            "Script finished: {}/{} messages accepted",
            report.accepted(),
            report.steps.len()
        );
        report
    }

    fn record(&self, control_id: &str, outcome: Result<AckResult>) -> StepOutcome {
        match outcome {
            Ok(ack) => StepOutcome {
                control_id: control_id.to_string(),
                accepted: true,
                detail: ack.code.to_string(),
            },
            Err(LinkError::ApplicationReject { code, .. }) => {
                warn!("Message {} rejected by peer: {}", control_id, code);
                self.notify(&format!("ACK error! Code: {}", code));
                StepOutcome {
                    control_id: control_id.to_string(),
                    accepted: false,
                    detail: code,
                }
            }
            Err(e) => {
                error!("Message {} failed: {}", control_id, e);
                self.notify(&format!("Error sending {}: {}", control_id, e));
                StepOutcome {
                    control_id: control_id.to_string(),
                    accepted: false,
                    detail: e.to_string(),
                }
            }
        }
    }

    fn notify(&self, text: &str) {
        self.notifier.notify(PeerRole::Initiator.label(), text);
    }
}
