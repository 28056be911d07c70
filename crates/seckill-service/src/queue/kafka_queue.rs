//! 基于 Kafka 的订单消息队列

use async_trait::async_trait;
use seckill_shared::kafka::{KafkaProducer, headers};
use tracing::{debug, instrument};

use super::OrderQueue;
use crate::error::Result;

/// Kafka 订单队列
///
/// 每条消息附带分类标签头，生产者以 acks=all 同步等待确认。
#[derive(Clone)]
pub struct KafkaOrderQueue {
    producer: KafkaProducer,
    tag: String,
}

impl KafkaOrderQueue {
    pub fn new(producer: KafkaProducer, tag: impl Into<String>) -> Self {
        Self {
            producer,
            tag: tag.into(),
        }
    }
}

#[async_trait]
impl OrderQueue for KafkaOrderQueue {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()))]
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let (partition, offset) = self
            .producer
            .send_with_headers(topic, key, payload, &[(headers::TAG, self.tag.as_str())])
            .await?;

        debug!(topic, key, partition, offset, "订单消息已确认");
        Ok(())
    }
}
