//! HL7信封解析
//!
//! 只解析链路需要的部分：MSH-9 消息类型、MSH-10 控制ID，
//! 以及按需读取的 ORC/OBR/PID/MSA 字段。其余内容保持原样。

use radlink_core::{AckCode, AckResult, LinkError, PatientDemographics};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Hl7Error {
    #[error("Empty HL7 message")]
    Empty,
    #[error("Message must start with MSH segment")]
    MissingMsh,
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid HL7 message format: {0}")]
    InvalidFormat(String),
    #[error("Message structure not satisfiable: {0}")]
    Unsatisfiable(String),
}

impl From<Hl7Error> for LinkError {
    fn from(err: Hl7Error) -> Self {
        LinkError::Message(err.to_string())
    }
}

/// 消息类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Registration,   // ADT^*
    Order,          // OMI^O23, ORM^O01
    Result,         // ORU^R01
    Acknowledgment, // ACK
    Other(String),
}

impl MessageKind {
    /// 按 MSH-9 分类
    pub fn classify(message_type: &str) -> Self {
        let message_type = message_type.trim();
        if message_type.starts_with("ACK") {
            MessageKind::Acknowledgment
        } else if message_type.starts_with("ADT") {
            MessageKind::Registration
        } else if message_type.starts_with("OMI^O23") || message_type.starts_with("ORM^O01") {
            MessageKind::Order
        } else if message_type.starts_with("ORU^R01") {
            MessageKind::Result
        } else {
            MessageKind::Other(message_type.to_string())
        }
    }
}

/// HL7段
///
/// `fields[n]` 即 `SEG-n` 的原文，`fields[0]` 为段名。
/// MSH 段中 `fields[1]` 是字段分隔符本身。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hl7Segment {
    pub segment_type: String,
    pub fields: Vec<String>,
}

impl Hl7Segment {
    /// 取字段原文，空字段返回 None
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// 消息信封：类型 + 控制ID，其余内容不透明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_type: String,
    pub control_id: String,
    pub segments: Vec<Hl7Segment>,
    component_separator: char,
}

impl MessageEnvelope {
    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(&self.message_type)
    }

    /// 第一个指定类型的段
    pub fn segment(&self, segment_type: &str) -> Option<&Hl7Segment> {
        self.segments
            .iter()
            .find(|segment| segment.segment_type == segment_type)
    }

    /// 读取 `SEG-n`
    pub fn field(&self, segment_type: &str, index: usize) -> Option<&str> {
        self.segment(segment_type).and_then(|segment| segment.field(index))
    }

    /// 读取 `SEG-n.m`（组件从1开始）
    pub fn component(&self, segment_type: &str, index: usize, component: usize) -> Option<&str> {
        let field = self.field(segment_type, index)?;
        field
            .split(self.component_separator)
            .nth(component.checked_sub(1)?)
            .filter(|value| !value.is_empty())
    }

    /// 申请号：ORC-2，缺失时取 OBR-2
    pub fn order_id(&self) -> Option<&str> {
        self.field("ORC", 2).or_else(|| self.field("OBR", 2))
    }

    /// 检查描述：OBR-4 原文
    pub fn study_descriptor(&self) -> Option<&str> {
        self.field("OBR", 4)
    }

    /// 确认结果：MSA-1 确认码，MSA-2 被确认的控制ID
    pub fn acknowledgment(&self) -> Option<AckResult> {
        let code = self.field("MSA", 1)?;
        Some(AckResult {
            acknowledged_control_id: self.field("MSA", 2).unwrap_or_default().to_string(),
            code: AckCode::from(code),
        })
    }

    /// 从PID段提取患者信息，就诊原因取 OBR-13
    pub fn patient(&self) -> Option<PatientDemographics> {
        let patient_id = self.field("PID", 3)?.to_string();
        let family_name = self.component("PID", 5, 1).unwrap_or_default().to_string();
        let given_name = self.component("PID", 5, 2).unwrap_or_default().to_string();

        Some(PatientDemographics {
            patient_id,
            given_name,
            family_name,
            birth_date: self.field("PID", 7).unwrap_or_default().to_string(),
            sex: self.field("PID", 8).unwrap_or_default().to_string(),
            reason: self.field("OBR", 13).unwrap_or_default().to_string(),
        })
    }
}

/// HL7解析器
pub struct Hl7Parser {
    field_separator: char,
    component_separator: char,
}

impl Default for Hl7Parser {
    fn default() -> Self {
        Self {
            field_separator: '|',
            component_separator: '^',
        }
    }
}

impl Hl7Parser {
    /// 创建新的HL7解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析HL7消息
    pub fn parse(&self, message: &str) -> Result<MessageEnvelope, Hl7Error> {
        let mut lines = message
            .split(|c| c == '\r' || c == '\n')
            .filter(|line| !line.trim().is_empty());

        let msh_line = lines.next().ok_or(Hl7Error::Empty)?.trim_start();
        if !msh_line.starts_with("MSH") {
            return Err(Hl7Error::MissingMsh);
        }

        // MSH-1 是紧跟段名的字符，MSH-2 第一个字符是组件分隔符
        let field_separator = msh_line[3..].chars().next().unwrap_or(self.field_separator);
        let msh = self.parse_msh(msh_line, field_separator)?;
        let component_separator = msh
            .field(2)
            .and_then(|encoding| encoding.chars().next())
            .unwrap_or(self.component_separator);

        let message_type = msh
            .field(9)
            .ok_or_else(|| Hl7Error::MissingField("Message Type (MSH-9)".to_string()))?
            .to_string();
        let control_id = msh
            .field(10)
            .ok_or_else(|| Hl7Error::MissingField("Message Control ID (MSH-10)".to_string()))?
            .to_string();

        let mut segments = vec![msh];
        for line in lines {
            segments.push(self.parse_segment(line, field_separator)?);
        }

        debug!(
            "Parsed HL7 envelope {} ({}) with {} segments",
            control_id,
            message_type,
            segments.len()
        );

        Ok(MessageEnvelope {
            message_type,
            control_id,
            segments,
            component_separator,
        })
    }

    fn parse_msh(&self, line: &str, field_separator: char) -> Result<Hl7Segment, Hl7Error> {
        let mut fields = vec!["MSH".to_string(), field_separator.to_string()];
        fields.extend(
            line[3..]
                .split(field_separator)
                .skip(1)
                .map(str::to_string),
        );

        Ok(Hl7Segment {
            segment_type: "MSH".to_string(),
            fields,
        })
    }

    /// 解析单个段
    fn parse_segment(&self, line: &str, field_separator: char) -> Result<Hl7Segment, Hl7Error> {
        let fields: Vec<String> = line.trim().split(field_separator).map(str::to_string).collect();
        let segment_type = fields[0].clone();

        let valid_name = segment_type.len() == 3
            && segment_type
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid_name {
            return Err(Hl7Error::InvalidFormat(format!(
                "Invalid segment name: {}",
                segment_type
            )));
        }

        Ok(Hl7Segment {
            segment_type,
            fields,
        })
    }
}

/// 解析原始消息字节，非UTF-8字节按替换字符处理
pub fn parse_envelope(payload: &[u8]) -> Result<MessageEnvelope, Hl7Error> {
    let text = String::from_utf8_lossy(payload);
    if text.trim().is_empty() {
        return Err(Hl7Error::Empty);
    }
    Hl7Parser::new().parse(&text)
}
