//! 错误定义模块

use std::time::Duration;
use thiserror::Error;

/// 帧编解码错误
///
/// 仅作用于单个连接：出现时连接被中止，不向上层传播。
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("帧缺少起始块标记")]
    MissingStartBlock,

    #[error("帧长度 {len} 超过上限 {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("连接在帧完整之前关闭 (已缓冲 {buffered} 字节)")]
    Incomplete { buffered: usize },

    #[error("消息内容包含结束块标记")]
    DelimiterInPayload,

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 传输客户端错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("对端在返回完整帧之前关闭了连接")]
    Closed,

    #[error("等待响应超时 ({0:?})")]
    Timeout(Duration),

    #[error("帧错误: {0}")]
    Framing(#[from] FramingError),

    #[error("网络错误: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

/// 链路统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("传输错误: {0}")]
    Transport(#[from] TransportError),

    #[error("消息错误: {0}")]
    Message(String),

    #[error("应用拒绝: 控制ID {control_id} 的确认码为 {code}")]
    ApplicationReject { control_id: String, code: String },

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 链路统一结果类型
pub type Result<T> = std::result::Result<T, LinkError>;
