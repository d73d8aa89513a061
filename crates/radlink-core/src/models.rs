//! 核心数据模型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 对等端角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Initiator, // HIS：发起登记和申请，接收结果
    Responder, // RIS：接收登记和申请，回传结果
}

impl PeerRole {
    /// 通知和日志中使用的来源标签
    pub fn label(&self) -> &'static str {
        match self {
            PeerRole::Initiator => "HIS",
            PeerRole::Responder => "RIS",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 检查申请状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,    // 等待发送结果
    ResultSent, // 结果已送达并被AA确认
}

/// 检查申请
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub order_id: String,
    pub study_descriptor: String, // OBR-4 原文
    pub status: OrderStatus,
    #[serde(default)]
    pub patient: Option<PatientDemographics>, // 申请消息PID段，结果消息回填
}

impl Order {
    pub fn pending(order_id: impl Into<String>, study_descriptor: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            study_descriptor: study_descriptor.into(),
            status: OrderStatus::Pending,
            patient: None,
        }
    }

    pub fn with_patient(mut self, patient: Option<PatientDemographics>) -> Self {
        self.patient = patient;
        self
    }
}

/// HL7确认码 (MSA-1)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckCode {
    AA,
    AE,
    AR,
    CA,
    CE,
    CR,
    Other(String),
}

impl AckCode {
    pub fn as_str(&self) -> &str {
        match self {
            AckCode::AA => "AA",
            AckCode::AE => "AE",
            AckCode::AR => "AR",
            AckCode::CA => "CA",
            AckCode::CE => "CE",
            AckCode::CR => "CR",
            AckCode::Other(code) => code.as_str(),
        }
    }

    /// 只有AA视为成功，其余一律视为拒绝
    pub fn is_accepted(&self) -> bool {
        matches!(self, AckCode::AA)
    }
}

impl From<&str> for AckCode {
    fn from(value: &str) -> Self {
        match value.trim() {
            "AA" => AckCode::AA,
            "AE" => AckCode::AE,
            "AR" => AckCode::AR,
            "CA" => AckCode::CA,
            "CE" => AckCode::CE,
            "CR" => AckCode::CR,
            other => AckCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析后的确认结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResult {
    pub acknowledged_control_id: String,
    pub code: AckCode,
}

impl AckResult {
    pub fn is_accepted(&self) -> bool {
        self.code.is_accepted()
    }
}

/// 患者基本信息（仅用于构造消息内容，对传输层不透明）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDemographics {
    pub patient_id: String,
    pub given_name: String,
    pub family_name: String,
    pub birth_date: String, // YYYYMMDD
    pub sex: String,
    pub reason: String, // 就诊原因
}

impl Default for PatientDemographics {
    fn default() -> Self {
        Self {
            patient_id: "123456".to_string(),
            given_name: "Juan Antonio".to_string(),
            family_name: "Pérez García".to_string(),
            birth_date: "19850315".to_string(),
            sex: "M".to_string(),
            reason: "Tos persistente".to_string(),
        }
    }
}
