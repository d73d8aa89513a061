//! 通用工具函数

use chrono::{DateTime, Local};

/// HL7 时间戳 (YYYYMMDDHHMMSS)
pub fn hl7_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// 当前时间的HL7时间戳
pub fn hl7_now() -> String {
    hl7_timestamp(Local::now())
}

/// 生成带前缀的四位序号控制ID，例如 `MSG0001`、`ORU0012`
pub fn sequence_control_id(prefix: &str, sequence: u32) -> String {
    format!("{}{:04}", prefix, sequence)
}

/// 控制ID中不能出现的字符：字段分隔符、段分隔符和MLLP帧标记
const CONTROL_ID_FORBIDDEN: [char; 5] = ['|', '\r', '\n', '\u{0b}', '\u{1c}'];

/// 验证控制ID：非空，且不含字段/段分隔符或帧标记
///
/// HL7 ST 类型允许空格和非ASCII字符。
pub fn is_valid_control_id(control_id: &str) -> bool {
    !control_id.trim().is_empty() && !control_id.contains(&CONTROL_ID_FORBIDDEN[..])
}
