//! MLLP帧编解码
//!
//! 线上格式: `0x0B || payload || 0x1C || 0x0D`。内容不做转义，
//! 内容中出现结束块标记视为帧错误。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use radlink_core::FramingError;
use tokio_util::codec::{Decoder, Encoder};

/// 起始块 <VT>
pub const START_BLOCK: u8 = 0x0B;
/// 结束块 <FS>
pub const END_BLOCK: u8 = 0x1C;
/// 帧终止符 <CR>
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// 默认最大帧长度 (1 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// 封装一帧
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.contains(&END_BLOCK) {
        return Err(FramingError::DelimiterInPayload);
    }

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_BLOCK);
    frame.extend_from_slice(payload);
    frame.push(END_BLOCK);
    frame.push(CARRIAGE_RETURN);
    Ok(frame)
}

/// 从缓冲区解出的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub payload: Vec<u8>,
    /// 已消费的字节数（含起始块之前的杂散字节和紧随的回车）
    pub consumed: usize,
}

/// 从缓冲区解出第一帧
///
/// 返回 `Ok(None)` 表示尚未见到结束块（帧不完整，不是错误）。
/// 内容取结束块之前最后一个起始块与该结束块之间的字节。
pub fn decode_frame(buf: &[u8]) -> Result<Option<DecodedFrame>, FramingError> {
    let end = match buf.iter().position(|&b| b == END_BLOCK) {
        Some(end) => end,
        None => return Ok(None),
    };

    let start = buf[..end]
        .iter()
        .rposition(|&b| b == START_BLOCK)
        .ok_or(FramingError::MissingStartBlock)?;

    let mut consumed = end + 1;
    if buf.get(consumed) == Some(&CARRIAGE_RETURN) {
        consumed += 1;
    }

    Ok(Some(DecodedFrame {
        payload: buf[start + 1..end].to_vec(),
        consumed,
    }))
}

/// MLLP网络编解码器
#[derive(Debug, Clone)]
pub struct MllpCodec {
    max_frame_length: usize,
    // 已扫描过、确认不含结束块的字节数
    next_index: usize,
}

impl MllpCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            next_index: 0,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MllpCodec {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let offset = src[self.next_index..]
            .iter()
            .position(|&b| b == END_BLOCK);

        let end = match offset {
            Some(offset) => self.next_index + offset,
            None => {
                self.next_index = src.len();
                // 起始块 + 内容
                if src.len() > self.max_frame_length + 1 {
                    let len = src.len();
                    src.clear();
                    self.next_index = 0;
                    return Err(FramingError::FrameTooLarge {
                        len,
                        max: self.max_frame_length,
                    });
                }
                return Ok(None);
            }
        };
        self.next_index = 0;

        let start = match src[..end].iter().rposition(|&b| b == START_BLOCK) {
            Some(start) => start,
            None => {
                src.advance(end + 1);
                return Err(FramingError::MissingStartBlock);
            }
        };

        let len = end - start - 1;
        if len > self.max_frame_length {
            src.advance(end + 1);
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }

        let frame = src.split_to(end + 1).freeze();
        if src.first() == Some(&CARRIAGE_RETURN) {
            src.advance(1);
        }

        Ok(Some(frame.slice(start + 1..end)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // 帧之间残留的回车/换行不算半帧
        let buffered = buf.len();
        let leftover_is_blank = buf.iter().all(|b| b.is_ascii_whitespace());
        buf.clear();
        self.next_index = 0;

        if leftover_is_blank {
            Ok(None)
        } else {
            Err(FramingError::Incomplete { buffered })
        }
    }
}

impl Encoder<Bytes> for MllpCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(&END_BLOCK) {
            return Err(FramingError::DelimiterInPayload);
        }
        if item.len() > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                len: item.len(),
                max: self.max_frame_length,
            });
        }

        dst.reserve(item.len() + 3);
        dst.put_u8(START_BLOCK);
        dst.extend_from_slice(&item);
        dst.put_u8(END_BLOCK);
        dst.put_u8(CARRIAGE_RETURN);
        Ok(())
    }
}
