//! 步骤间的演示节奏
//!
//! 演示时在协议步骤之间停顿，测试时使用 `NoDelay`。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait DelayStrategy: Send + Sync {
    async fn pause(&self, step: &str);
}

/// 不停顿
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[async_trait]
impl DelayStrategy for NoDelay {
    async fn pause(&self, _step: &str) {}
}

/// 固定停顿
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl DelayStrategy for FixedDelay {
    async fn pause(&self, step: &str) {
        debug!("Pausing {:?} after {}", self.0, step);
        tokio::time::sleep(self.0).await;
    }
}

/// 零时长时退化为 `NoDelay`
pub fn delay_for(duration: Duration) -> std::sync::Arc<dyn DelayStrategy> {
    if duration.is_zero() {
        std::sync::Arc::new(NoDelay)
    } else {
        std::sync::Arc::new(FixedDelay(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_sleeps() {
        let start = tokio::time::Instant::now();
        FixedDelay(Duration::from_secs(7)).pause("ADT^A04").await;
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_zero_delay_is_immediate() {
        let start = std::time::Instant::now();
        delay_for(Duration::ZERO).pause("ADT^A04").await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
