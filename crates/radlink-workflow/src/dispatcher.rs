//! 消息分发 / 对等端状态机
//!
//! 每条消息独立处理，除RIS端的申请台账外没有跨消息的会话状态。

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use radlink_core::{AckCode, AckResult, LinkError, PeerRole, Result};
use radlink_integration::{parse_envelope, MessageBuilder, MessageEnvelope, MessageKind, Notifier};
use radlink_mllp::MessageHandler;
use tracing::{debug, error, info, warn};

use crate::ledger::OrderLedger;

/// 对一条入站消息的反应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// 在同一连接上回写确认
    Reply { payload: String, code: AckCode },
    /// 收到AA确认
    Accepted(AckResult),
    /// 收到非AA确认
    Rejected(AckResult),
    /// 不回复：未知类型、解析失败或本角色不处理的消息
    Ignored,
}

impl Reaction {
    pub fn into_response(self) -> Option<Bytes> {
        match self {
            Reaction::Reply { payload, .. } => Some(Bytes::from(payload)),
            _ => None,
        }
    }
}

/// 消息分发器
pub struct Dispatcher {
    role: PeerRole,
    builder: MessageBuilder,
    ledger: Option<Arc<OrderLedger>>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    /// HIS端：处理ACK与ORU^R01
    pub fn initiator(builder: MessageBuilder, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            role: PeerRole::Initiator,
            builder,
            ledger: None,
            notifier,
        }
    }

    /// RIS端：处理ADT与OMI^O23，申请写入台账
    pub fn responder(
        builder: MessageBuilder,
        ledger: Arc<OrderLedger>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            role: PeerRole::Responder,
            builder,
            ledger: Some(ledger),
            notifier,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// 处理一条原始消息
    pub async fn dispatch(&self, payload: &[u8]) -> Reaction {
        let envelope = match parse_envelope(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[{}] Failed to parse HL7 message: {}", self.role, e);
                self.notify(&format!("Failed to parse HL7 message: {}", e));
                return Reaction::Ignored;
            }
        };

        info!(
            "[{}] Received {} ({})",
            self.role, envelope.message_type, envelope.control_id
        );
        debug!("[{}] Payload:\n{}", self.role, String::from_utf8_lossy(payload));
        self.notify(&format!(
            "Received {} ({})",
            envelope.message_type, envelope.control_id
        ));

        match self.role {
            PeerRole::Initiator => self.on_initiator_message(&envelope),
            PeerRole::Responder => self.on_responder_message(&envelope).await,
        }
    }

    fn on_initiator_message(&self, envelope: &MessageEnvelope) -> Reaction {
        match envelope.kind() {
            MessageKind::Acknowledgment => match envelope.acknowledgment() {
                Some(ack) if ack.is_accepted() => {
                    info!("[{}] ACK received: {}", self.role, ack.code);
                    self.notify(&format!("ACK received: {}", ack.code));
                    Reaction::Accepted(ack)
                }
                Some(ack) => {
                    warn!(
                        "[{}] Acknowledgment rejected: control id {} code {}",
                        self.role, ack.acknowledged_control_id, ack.code
                    );
                    self.notify(&format!("ACK error! Code: {}", ack.code));
                    Reaction::Rejected(ack)
                }
                None => {
                    warn!(
                        "[{}] ACK {} without MSA segment, ignoring",
                        self.role, envelope.control_id
                    );
                    Reaction::Ignored
                }
            },
            MessageKind::Result => {
                let order_id = envelope.order_id().unwrap_or("<unknown>");
                info!("[{}] Result received for order {}", self.role, order_id);
                self.notify(&format!("Result received for order: {}", order_id));
                self.acknowledge(&envelope.control_id, AckCode::AA)
            }
            _ => self.ignore(envelope),
        }
    }

    async fn on_responder_message(&self, envelope: &MessageEnvelope) -> Reaction {
        match envelope.kind() {
            MessageKind::Registration => {
                info!("[{}] Patient registered", self.role);
                self.notify("Patient registered in RIS.");
                self.acknowledge(&envelope.control_id, AckCode::AA)
            }
            MessageKind::Order => {
                let order_id = match envelope.order_id() {
                    Some(order_id) => order_id,
                    None => {
                        warn!(
                            "[{}] Order message {} carries no order id (ORC-2/OBR-2)",
                            self.role, envelope.control_id
                        );
                        return self.acknowledge(&envelope.control_id, AckCode::AE);
                    }
                };
                let descriptor = envelope.study_descriptor().unwrap_or_default();

                // 先构造确认，无法确认的申请不入台账
                let reply = self.acknowledge(&envelope.control_id, AckCode::AA);
                if matches!(reply, Reaction::Ignored) {
                    warn!(
                        "[{}] Order {} not registered: acknowledgment could not be built",
                        self.role, order_id
                    );
                    return reply;
                }

                if let Some(ledger) = &self.ledger {
                    ledger
                        .insert_pending(order_id, descriptor, envelope.patient())
                        .await;
                }
                info!("[{}] New order received: {} - {}", self.role, order_id, descriptor);
                self.notify(&format!("New order received: {} - {}", order_id, descriptor));
                reply
            }
            _ => self.ignore(envelope),
        }
    }

    fn ignore(&self, envelope: &MessageEnvelope) -> Reaction {
        warn!(
            "[{}] Unexpected message type {} ({}), no reply",
            self.role, envelope.message_type, envelope.control_id
        );
        Reaction::Ignored
    }

    fn acknowledge(&self, control_id: &str, code: AckCode) -> Reaction {
        match self.builder.build_ack(control_id, &code) {
            Ok(payload) => {
                info!("[{}] Sending ACK {} for {}", self.role, code, control_id);
                self.notify(&format!("ACK {} sent for {}", code, control_id));
                Reaction::Reply { payload, code }
            }
            Err(e) => {
                error!("[{}] Failed to build ACK for {}: {}", self.role, control_id, e);
                Reaction::Ignored
            }
        }
    }

    fn notify(&self, text: &str) {
        self.notifier.notify(self.role.label(), text);
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, payload: Bytes, peer: SocketAddr) -> Option<Bytes> {
        debug!("[{}] Dispatching {} bytes from {}", self.role, payload.len(), peer);
        self.dispatch(&payload).await.into_response()
    }
}

/// 检查对端返回的确认
///
/// 只有 `AA` 视为成功；其他确认码返回 `ApplicationReject`，由调用方决定如何上报。
pub fn evaluate_acknowledgment(payload: &[u8]) -> Result<AckResult> {
    let envelope = parse_envelope(payload)?;
    if envelope.kind() != MessageKind::Acknowledgment {
        return Err(LinkError::Message(format!(
            "expected ACK, got {}",
            envelope.message_type
        )));
    }

    let ack = envelope
        .acknowledgment()
        .ok_or_else(|| LinkError::Message("ACK without MSA segment".to_string()))?;

    if ack.is_accepted() {
        Ok(ack)
    } else {
        Err(LinkError::ApplicationReject {
            control_id: ack.acknowledged_control_id,
            code: ack.code.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use radlink_core::{OrderStatus, PatientDemographics};
    use radlink_integration::{FacilityConfig, OrderRequest, StudyReport};
    use std::sync::Mutex;

    /// 记录所有通知的测试用通知器
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, source: &str, text: &str) {
            self.events
                .lock()
                .unwrap()
                .push((source.to_string(), text.to_string()));
        }
    }

    fn responder() -> (Dispatcher, Arc<OrderLedger>, Arc<RecordingNotifier>) {
        let ledger = Arc::new(OrderLedger::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::responder(
            MessageBuilder::new(FacilityConfig::ris()),
            Arc::clone(&ledger),
            notifier.clone(),
        );
        (dispatcher, ledger, notifier)
    }

    fn his_builder() -> MessageBuilder {
        MessageBuilder::new(FacilityConfig::his())
    }

    fn reply_envelope(reaction: Reaction) -> MessageEnvelope {
        match reaction {
            Reaction::Reply { payload, .. } => parse_envelope(payload.as_bytes()).unwrap(),
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_responder_registers_order() {
        let (dispatcher, ledger, notifier) = responder();
        let omi = his_builder()
            .build_omi_o23(
                "MSG0002",
                &PatientDemographics::default(),
                &OrderRequest::chest_radiograph("ORD0001"),
            )
            .unwrap();

        let reply = reply_envelope(dispatcher.dispatch(omi.as_bytes()).await);
        assert_eq!(reply.message_type, "ACK");
        let ack = reply.acknowledgment().unwrap();
        assert_eq!(ack.code, AckCode::AA);
        assert_eq!(ack.acknowledged_control_id, "MSG0002");

        let order = ledger.get("ORD0001").await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.study_descriptor, "71020^RADIOGRAFIA TORAX^CPT4");
        assert_eq!(order.patient.unwrap().patient_id, "123456");

        let events = notifier.events.lock().unwrap();
        assert!(events.iter().all(|(source, _)| source == "RIS"));
        assert!(events.iter().any(|(_, text)| text.contains("ORD0001")));
    }

    #[tokio::test]
    async fn test_responder_accepts_spaced_and_non_ascii_control_ids() {
        let (dispatcher, ledger, _) = responder();
        let omi = his_builder()
            .build_omi_o23(
                "MSG 0002",
                &PatientDemographics::default(),
                &OrderRequest::chest_radiograph("ORD0001"),
            )
            .unwrap();

        let ack = reply_envelope(dispatcher.dispatch(omi.as_bytes()).await)
            .acknowledgment()
            .unwrap();
        assert_eq!(ack.code, AckCode::AA);
        assert_eq!(ack.acknowledged_control_id, "MSG 0002");

        let orders = ledger.snapshot().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "ORD0001");
        assert_eq!(orders[0].status, OrderStatus::Pending);

        let adt = his_builder()
            .build_adt_a04("MSGÑ01", &PatientDemographics::default())
            .unwrap();
        let ack = reply_envelope(dispatcher.dispatch(adt.as_bytes()).await)
            .acknowledgment()
            .unwrap();
        assert_eq!(ack.code, AckCode::AA);
        assert_eq!(ack.acknowledged_control_id, "MSGÑ01");
    }

    #[tokio::test]
    async fn test_responder_skips_ledger_when_ack_cannot_be_built() {
        let ledger = Arc::new(OrderLedger::new());
        let mut facility = FacilityConfig::ris();
        facility.sending_application = "RIS|X".to_string();
        let dispatcher = Dispatcher::responder(
            MessageBuilder::new(facility),
            Arc::clone(&ledger),
            Arc::new(RecordingNotifier::default()),
        );
        let omi = his_builder()
            .build_omi_o23(
                "MSG0002",
                &PatientDemographics::default(),
                &OrderRequest::chest_radiograph("ORD0001"),
            )
            .unwrap();

        assert_eq!(dispatcher.dispatch(omi.as_bytes()).await, Reaction::Ignored);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_responder_acknowledges_registration_without_ledger_change() {
        let (dispatcher, ledger, _) = responder();
        let adt = his_builder()
            .build_adt_a04("MSG0001", &PatientDemographics::default())
            .unwrap();

        let reaction = dispatcher.dispatch(adt.as_bytes()).await;
        let ack = reply_envelope(reaction).acknowledgment().unwrap();
        assert_eq!(ack.code, AckCode::AA);
        assert_eq!(ack.acknowledged_control_id, "MSG0001");
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_responder_order_without_id_gets_ae() {
        let (dispatcher, ledger, _) = responder();
        let message = "MSH|^~\\&|HIS|HOSP|RIS|RAD|20241030120000||OMI^O23|MSG0007|P|2.5\rPID|||123456";

        let reaction = dispatcher.dispatch(message.as_bytes()).await;
        let ack = reply_envelope(reaction).acknowledgment().unwrap();
        assert_eq!(ack.code, AckCode::AE);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_responder_ignores_unknown_and_unparseable() {
        let (dispatcher, ledger, _) = responder();

        let unknown = "MSH|^~\\&|HIS|HOSP|RIS|RAD|20241030120000||SIU^S12|MSG0008|P|2.5";
        assert_eq!(dispatcher.dispatch(unknown.as_bytes()).await, Reaction::Ignored);

        // RIS不处理结果消息
        let oru = MessageBuilder::new(FacilityConfig::ris())
            .build_oru_r01("ORU0001", "ORD0001", None, &StudyReport::for_descriptor("CR"))
            .unwrap();
        assert_eq!(dispatcher.dispatch(oru.as_bytes()).await, Reaction::Ignored);

        assert_eq!(dispatcher.dispatch(b"not hl7 at all").await, Reaction::Ignored);
        assert_eq!(dispatcher.dispatch(b"").await, Reaction::Ignored);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_initiator_acknowledges_result() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::initiator(his_builder(), notifier.clone());
        let oru = MessageBuilder::new(FacilityConfig::ris())
            .build_oru_r01(
                "ORU0001",
                "ORD0001",
                Some(&PatientDemographics::default()),
                &StudyReport::for_descriptor("71020^RADIOGRAFIA TORAX^CPT4"),
            )
            .unwrap();

        let reply = reply_envelope(dispatcher.dispatch(oru.as_bytes()).await);
        assert_eq!(reply.field("MSH", 3), Some("HIS"));
        let ack = reply.acknowledgment().unwrap();
        assert_eq!(ack.code, AckCode::AA);
        assert_eq!(ack.acknowledged_control_id, "ORU0001");

        let events = notifier.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(source, text)| source == "HIS" && text.contains("ORD0001")));
    }

    #[tokio::test]
    async fn test_initiator_surfaces_rejection() {
        let dispatcher = Dispatcher::initiator(his_builder(), Arc::new(RecordingNotifier::default()));
        let ris = MessageBuilder::new(FacilityConfig::ris());

        let accepted = ris.build_ack("MSG0001", &AckCode::AA).unwrap();
        assert!(matches!(
            dispatcher.dispatch(accepted.as_bytes()).await,
            Reaction::Accepted(_)
        ));

        let rejected = ris.build_ack("MSG0002", &AckCode::AR).unwrap();
        match dispatcher.dispatch(rejected.as_bytes()).await {
            Reaction::Rejected(ack) => {
                assert_eq!(ack.code, AckCode::AR);
                assert_eq!(ack.acknowledged_control_id, "MSG0002");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        // 收到的确认不再回复
        assert_eq!(
            dispatcher.dispatch(rejected.as_bytes()).await.into_response(),
            None
        );
    }

    #[tokio::test]
    async fn test_initiator_ignores_orders() {
        let dispatcher = Dispatcher::initiator(his_builder(), Arc::new(RecordingNotifier::default()));
        let omi = his_builder()
            .build_omi_o23(
                "MSG0002",
                &PatientDemographics::default(),
                &OrderRequest::chest_ct("ORD0002"),
            )
            .unwrap();
        assert_eq!(dispatcher.dispatch(omi.as_bytes()).await, Reaction::Ignored);
    }

    #[test]
    fn test_evaluate_acknowledgment() {
        let ris = MessageBuilder::new(FacilityConfig::ris());

        let ok = ris.build_ack("MSG0001", &AckCode::AA).unwrap();
        assert_eq!(
            evaluate_acknowledgment(ok.as_bytes()).unwrap().acknowledged_control_id,
            "MSG0001"
        );

        let rejected = ris.build_ack("MSG0001", &AckCode::AE).unwrap();
        match evaluate_acknowledgment(rejected.as_bytes()) {
            Err(LinkError::ApplicationReject { control_id, code }) => {
                assert_eq!(control_id, "MSG0001");
                assert_eq!(code, "AE");
            }
            other => panic!("expected ApplicationReject, got {:?}", other),
        }

        let adt = his_builder()
            .build_adt_a04("MSG0001", &PatientDemographics::default())
            .unwrap();
        assert!(matches!(
            evaluate_acknowledgment(adt.as_bytes()),
            Err(LinkError::Message(_))
        ));
    }
}
