//! 死信队列
//!
//! 消息重投次数耗尽、且补偿任务也无法落库时，原始消息连同失败元数据
//! 被写入死信 topic 停放，等待对账流程或人工处理，保证不会被静默丢弃。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SeckillError;
use crate::kafka::{KafkaProducer, topics};

/// 死信消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息 key（如 order_<reservation_id>）
    pub message_key: String,
    pub source_topic: String,
    /// 原始消息内容
    pub payload: String,
    /// 最后一次失败原因
    pub error: String,
    /// 停放时已重投的次数
    pub redelivery_count: u32,
    pub parked_at: DateTime<Utc>,
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_key: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        redelivery_count: u32,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_key: message_key.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            redelivery_count,
            parked_at: Utc::now(),
            source_service: source_service.into(),
        }
    }
}

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
        }
    }

    /// 将失败消息停放到死信队列
    pub async fn park(
        &self,
        message_key: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        redelivery_count: u32,
    ) -> Result<(), SeckillError> {
        let dlq_msg = DeadLetterMessage::new(
            message_key,
            source_topic,
            payload,
            error,
            redelivery_count,
            &self.source_service,
        );

        self.producer
            .send_json(topics::DEAD_LETTER_QUEUE, message_key, &dlq_msg)
            .await?;

        warn!(message_key, source_topic, error, redelivery_count, "消息已停放到死信队列");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_message_creation() {
        let msg = DeadLetterMessage::new(
            "order_0190",
            "seckill.orders",
            r#"{"itemId":1}"#,
            "数据库连接失败",
            5,
            "seckill-worker",
        );

        assert_eq!(msg.message_key, "order_0190");
        assert_eq!(msg.source_topic, "seckill.orders");
        assert_eq!(msg.redelivery_count, 5);
        assert_eq!(msg.source_service, "seckill-worker");
    }

    #[test]
    fn test_dead_letter_serialization_is_camel_case() {
        let msg = DeadLetterMessage::new("k", "t", "p", "e", 2, "svc");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("messageKey"));
        assert!(json.contains("sourceTopic"));
        assert!(json.contains("redeliveryCount"));
        assert!(json.contains("parkedAt"));

        let back: DeadLetterMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.redelivery_count, 2);
        assert_eq!(back.source_service, "svc");
    }
}
