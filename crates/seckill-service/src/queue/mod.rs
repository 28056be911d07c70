//! 订单消息队列（生产者侧）
//!
//! 把准入成功的临时订单交给至少一次投递的消息通道。
//! `send` 返回成功表示消息已被 broker 确认；返回错误表示消息确定未投递，
//! 调用方可以安全回滚预占，后台不会再静默重发。

mod kafka_queue;

use async_trait::async_trait;

use crate::error::Result;

pub use kafka_queue::KafkaOrderQueue;

/// 订单消息队列接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderQueue: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}
