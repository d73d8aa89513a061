//! MLLP监听服务器

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use radlink_core::FramingError;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::codec::{MllpCodec, DEFAULT_MAX_FRAME_LENGTH};

/// 消息处理器
///
/// 每个连接调用一次，可能被多个连接并发调用。返回 `None` 时不回写任何内容。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Bytes, peer: SocketAddr) -> Option<Bytes>;
}

/// 监听器配置
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: String,                   // 监听地址
    pub port: u16,                      // 监听端口
    pub max_connections: usize,         // 最大并发连接数
    pub read_timeout: Option<Duration>, // 等待完整请求帧的时间上限
    pub max_frame_length: usize,        // 最大帧长度
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6662,
            max_connections: 64,
            read_timeout: Some(Duration::from_secs(30)),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// MLLP服务器
///
/// 没有优雅停机：`serve` 一直运行到进程退出。
pub struct MllpServer {
    config: ListenerConfig,
    listener: TcpListener,
    active_connections: Arc<AtomicUsize>,
}

impl MllpServer {
    /// 绑定监听端口
    pub async fn bind(config: ListenerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!("MLLP listener bound on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 实际监听地址（端口为0时由系统分配）
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受连接并逐个交给处理器
    pub async fn serve(self, handler: Arc<dyn MessageHandler>) {
        let config = Arc::new(self.config);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let guard = match ConnectionGuard::acquire(&self.active_connections, config.max_connections) {
                Some(guard) => guard,
                None => {
                    warn!(
                        "Maximum connections ({}) reached, rejecting connection from {}",
                        config.max_connections, peer
                    );
                    drop(stream);
                    continue;
                }
            };

            debug!("Accepted connection from {}", peer);
            let handler = Arc::clone(&handler);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = handle_connection(stream, peer, handler, &config).await {
                    warn!("Aborted connection from {}: {}", peer, e);
                }
            });
        }
    }
}

/// 绑定并运行监听器
pub async fn serve(config: ListenerConfig, handler: Arc<dyn MessageHandler>) -> std::io::Result<()> {
    let server = MllpServer::bind(config).await?;
    server.serve(handler).await;
    Ok(())
}

/// 处理单个连接：读一帧，至多回写一帧
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    config: &ListenerConfig,
) -> Result<(), FramingError> {
    let mut framed = Framed::new(stream, MllpCodec::with_max_frame_length(config.max_frame_length));

    let next = match config.read_timeout {
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!("No complete frame from {} within {:?}, closing", peer, limit);
                return Ok(());
            }
        },
        None => framed.next().await,
    };

    let payload = match next {
        Some(Ok(payload)) => payload,
        Some(Err(e)) => return Err(e),
        None => {
            debug!("Connection from {} closed before sending a frame", peer);
            return Ok(());
        }
    };

    debug!("Received {} bytes from {}", payload.len(), peer);
    if let Some(response) = handler.handle(payload, peer).await {
        framed.send(response).await?;
        debug!("Replied to {}", peer);
    }

    Ok(())
}

/// 活跃连接计数，离开作用域时自动释放
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let acquired = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < limit).then_some(active + 1)
            })
            .is_ok();

        acquired.then(|| Self {
            counter: Arc::clone(counter),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
