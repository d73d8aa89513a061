//! RadLink 工作流
//!
//! HIS / RIS 两端的消息分发、申请台账、结果扫描和脚本会话。

pub mod delay;
pub mod dispatcher;
pub mod initiator;
pub mod ledger;
pub mod peer;
pub mod scanner;

pub use delay::{delay_for, DelayStrategy, FixedDelay, NoDelay};
pub use dispatcher::{evaluate_acknowledgment, Dispatcher, Reaction};
pub use initiator::{InitiatorSession, ScriptReport, StepOutcome};
pub use ledger::OrderLedger;
pub use peer::{InitiatorPeer, PeerSettings, ResponderPeer};
pub use scanner::{ResultScanner, ScanReport};
