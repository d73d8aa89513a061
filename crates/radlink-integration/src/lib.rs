//! # RadLink集成模块
//!
//! HIS/RIS消息内容与外部协作方：
//! - HL7 v2 信封解析（消息类型、控制ID、申请号、确认码）
//! - ADT^A04 / OMI^O23 / ORU^R01 / ACK 消息构造
//! - 尽力而为的事件通知（Web监控面板）

pub mod builder;
pub mod hl7;
pub mod notify;

pub use builder::{FacilityConfig, MessageBuilder, OrderRequest, StudyReport};
pub use hl7::{parse_envelope, Hl7Error, Hl7Parser, Hl7Segment, MessageEnvelope, MessageKind};
pub use notify::{HttpNotifier, NoopNotifier, NotificationEvent, Notifier};
