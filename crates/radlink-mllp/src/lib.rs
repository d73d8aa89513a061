//! # MLLP传输模块
//!
//! 提供HL7最小下层协议(MLLP)的实现，包括：
//! - 帧编解码：起始块/结束块/回车的字节级封装，支持跨多次读取的增量组帧
//! - 传输客户端：单连接单请求/单响应
//! - 传输监听器：每个连接读取一帧，交给处理器，至多回写一帧

pub mod client;
pub mod codec;
pub mod server;

pub use client::MllpClient;
pub use codec::{
    decode_frame, encode_frame, DecodedFrame, MllpCodec, CARRIAGE_RETURN,
    DEFAULT_MAX_FRAME_LENGTH, END_BLOCK, START_BLOCK,
};
pub use server::{serve, ListenerConfig, MessageHandler, MllpServer};
