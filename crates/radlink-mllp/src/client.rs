//! MLLP传输客户端
//!
//! 每次调用打开一个连接，发送一帧，等待一帧响应，然后关闭连接。

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use radlink_core::{FramingError, TransportError};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::{MllpCodec, DEFAULT_MAX_FRAME_LENGTH};

/// MLLP客户端
#[derive(Debug, Clone)]
pub struct MllpClient {
    timeout: Option<Duration>,
    max_frame_length: usize,
}

impl MllpClient {
    /// 创建不设超时的客户端
    pub fn new() -> Self {
        Self {
            timeout: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// 设置整个请求/响应交换的截止时间
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 发送一条消息并返回对端的响应内容
    ///
    /// `address` 为 `host:port`。连接在返回前总会被关闭。
    pub async fn send(&self, address: &str, payload: &[u8]) -> Result<Bytes, TransportError> {
        let exchange = self.exchange(address, payload);

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => exchange.await,
        }
    }

    async fn exchange(&self, address: &str, payload: &[u8]) -> Result<Bytes, TransportError> {
        let stream = TcpStream::connect(address).await?;
        let mut framed = Framed::new(stream, MllpCodec::with_max_frame_length(self.max_frame_length));

        framed.send(Bytes::copy_from_slice(payload)).await?;
        debug!("Sent {} bytes to {}", payload.len(), address);

        match framed.next().await {
            Some(Ok(response)) => {
                debug!("Received {} bytes from {}", response.len(), address);
                Ok(response)
            }
            Some(Err(FramingError::Incomplete { buffered })) => {
                debug!("Peer {} closed mid-frame after {} bytes", address, buffered);
                Err(TransportError::Closed)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Closed),
        }
    }
}

impl Default for MllpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_peer<F, Fut>(behaviour: F) -> String
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            behaviour(stream).await;
        });
        addr
    }

    async fn read_one_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a frame");
            data.extend_from_slice(&chunk[..n]);
            if let Some(frame) = crate::codec::decode_frame(&data).unwrap() {
                return frame.payload;
            }
        }
    }

    #[tokio::test]
    async fn test_send_returns_response() {
        let addr = spawn_peer(|mut stream| async move {
            let request = read_one_frame(&mut stream).await;
            assert_eq!(request, b"PING");
            // 分两次写出，验证增量组帧
            let frame = encode_frame(b"PONG").unwrap();
            stream.write_all(&frame[..3]).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(&frame[3..]).await.unwrap();
        })
        .await;

        let response = MllpClient::new().send(&addr, b"PING").await.unwrap();
        assert_eq!(&response[..], b"PONG");
    }

    #[tokio::test]
    async fn test_send_closed_without_reply() {
        let addr = spawn_peer(|mut stream| async move {
            let _ = read_one_frame(&mut stream).await;
        })
        .await;

        let result = MllpClient::new().send(&addr, b"PING").await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_send_closed_mid_frame() {
        let addr = spawn_peer(|mut stream| async move {
            let _ = read_one_frame(&mut stream).await;
            stream.write_all(b"\x0bMSH|trunc").await.unwrap();
        })
        .await;

        let result = MllpClient::new().send(&addr, b"PING").await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let addr = spawn_peer(|mut stream| async move {
            let _ = read_one_frame(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let client = MllpClient::new().with_timeout(Some(Duration::from_millis(100)));
        let result = client.send(&addr, b"PING").await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_send_rejects_delimiter_in_payload() {
        let addr = spawn_peer(|_stream| async move {}).await;

        let result = MllpClient::new().send(&addr, b"A\x1cB").await;
        assert!(matches!(
            result,
            Err(TransportError::Framing(FramingError::DelimiterInPayload))
        ));
    }

    #[tokio::test]
    async fn test_send_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = MllpClient::new().send(&addr, b"PING").await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
