//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、消息头、错误映射和优雅关闭语义。
//!
//! 生产者使用同步确认语义：`send` 只有在 broker 确认写入后才返回成功，
//! 返回错误即表示消息未被投递，调用方可以安全回滚。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::SeckillError;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Topic / Header 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称
pub mod topics {
    pub const SECKILL_ORDERS: &str = "seckill.orders";
    pub const DEAD_LETTER_QUEUE: &str = "seckill.orders.dlq";
}

/// 消息头名称
pub mod headers {
    /// 消息分类标签（如 seckill_order）
    pub const TAG: &str = "x-tag";
    /// 已重投次数，首次投递时不存在
    pub const REDELIVERY_COUNT: &str = "x-redelivery-count";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 读取消息头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// 已重投次数，缺失或无法解析时视为首次投递
    pub fn redelivery_count(&self) -> u32 {
        self.header(headers::REDELIVERY_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, SeckillError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SeckillError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 限定单条消息从入队到 broker 确认的总时长，
    /// 超时后 future 以错误完成，且 librdkafka 不会在后台继续投递该消息。
    /// `acks=all` 保证返回成功时消息已写入全部同步副本。
    pub fn new(config: &KafkaConfig) -> Result<Self, SeckillError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| SeckillError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), SeckillError> {
        self.send_with_headers(topic, key, payload, &[]).await
    }

    /// 发送带消息头的原始字节消息
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64), SeckillError> {
        let mut owned_headers = OwnedHeaders::new();
        for (name, value) in headers {
            owned_headers = owned_headers.insert(Header {
                key: name,
                value: Some(*value),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| SeckillError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), SeckillError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| SeckillError::Kafka(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义。
/// 关闭自动提交，仅在 handler 成功返回后提交 offset，实现至少一次消费。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    handler_retry: RetryPolicy,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组，
    /// 例如 "seckill-order-consumer.dlq"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, SeckillError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| SeckillError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            handler_retry: RetryPolicy::new(
                u32::MAX,
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
        })
    }

    /// 覆盖 handler 失败后原地重试的退避策略
    pub fn with_handler_retry(mut self, policy: RetryPolicy) -> Self {
        self.handler_retry = policy;
        self
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), SeckillError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SeckillError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时调用 handler 处理，成功后提交 offset。
    /// - handler 失败时按退避原地重试同一条消息，不拉取后续消息。
    ///   offset 按位置提交，先处理后续消息会让提交越过失败的消息。
    /// - 关闭信号变为 `true` 时退出循环；重试中的消息不提交，重启后重新投递。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), SeckillError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    let borrowed_msg = match msg_result {
                        Ok(borrowed_msg) => borrowed_msg,
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    if !settle(&msg, &handler, &self.handler_retry, &mut shutdown).await {
                        warn!(
                            partition = msg.partition,
                            offset = msg.offset,
                            "关闭时消息仍未处理成功，offset 未提交"
                        );
                        break;
                    }

                    if let Err(e) = self
                        .consumer
                        .commit_message(&borrowed_msg, CommitMode::Async)
                    {
                        error!(error = %e, "提交 offset 失败");
                    }
                }
            }
        }
    }
}

/// 重复执行 handler 直到成功
///
/// 返回 `false` 表示退避等待期间收到了关闭信号，消息仍未处理成功。
async fn settle<F, Fut>(
    msg: &ConsumerMessage,
    handler: &F,
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = Result<(), SeckillError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match handler(msg.clone()).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        let delay = policy.delay_for_attempt(attempt.min(16));
        error!(
            error = %err,
            partition = msg.partition,
            offset = msg.offset,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "处理 Kafka 消息失败，退避后重试同一条消息"
        );
        attempt = attempt.saturating_add(1);

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }

            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_headers(headers: HashMap<String, String>) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::SECKILL_ORDERS.to_string(),
            partition: 0,
            offset: 7,
            key: Some("order_abc".to_string()),
            payload: br#"{"itemId":1}"#.to_vec(),
            timestamp: None,
            headers,
        }
    }

    #[test]
    fn test_topic_constants() {
        assert_eq!(topics::SECKILL_ORDERS, "seckill.orders");
        assert_eq!(topics::DEAD_LETTER_QUEUE, "seckill.orders.dlq");
    }

    #[test]
    fn test_redelivery_count_defaults_to_zero() {
        let msg = message_with_headers(HashMap::new());
        assert_eq!(msg.redelivery_count(), 0);
    }

    #[test]
    fn test_redelivery_count_from_header() {
        let msg = message_with_headers(HashMap::from([(
            headers::REDELIVERY_COUNT.to_string(),
            "3".to_string(),
        )]));
        assert_eq!(msg.redelivery_count(), 3);

        // 非法值视为首次投递
        let msg = message_with_headers(HashMap::from([(
            headers::REDELIVERY_COUNT.to_string(),
            "abc".to_string(),
        )]));
        assert_eq!(msg.redelivery_count(), 0);
    }

    #[test]
    fn test_header_lookup() {
        let msg = message_with_headers(HashMap::from([(
            headers::TAG.to_string(),
            "seckill_order".to_string(),
        )]));
        assert_eq!(msg.header(headers::TAG), Some("seckill_order"));
        assert_eq!(msg.header("missing"), None);
    }

    #[test]
    fn test_consumer_message_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct ItemRef {
            item_id: i64,
        }

        let msg = message_with_headers(HashMap::new());
        let parsed: ItemRef = msg.deserialize_payload().unwrap();
        assert_eq!(parsed, ItemRef { item_id: 1 });
    }

    #[test]
    fn test_consumer_message_deserialize_invalid_json() {
        let mut msg = message_with_headers(HashMap::new());
        msg.payload = b"not json".to_vec();

        let result: Result<serde_json::Value, _> = msg.deserialize_payload();
        assert!(result.is_err());
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(u32::MAX, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_settle_retries_same_message_until_success() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let handler = |msg: ConsumerMessage| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(msg.offset, 7);
                if attempt < 2 {
                    Err(SeckillError::Kafka("死信投递失败".to_string()))
                } else {
                    Ok(())
                }
            }
        };

        let (_tx, mut rx) = watch::channel(false);
        let msg = message_with_headers(HashMap::new());

        assert!(settle(&msg, &handler, &fast_retry(), &mut rx).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settle_gives_up_only_on_shutdown() {
        let handler = |_msg: ConsumerMessage| async {
            Err::<(), _>(SeckillError::Kafka("broker 不可达".to_string()))
        };

        let (tx, mut rx) = watch::channel(false);
        let msg = message_with_headers(HashMap::new());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).unwrap();
            tx
        });

        assert!(!settle(&msg, &handler, &fast_retry(), &mut rx).await);
        drop(stopper.await.unwrap());
    }
}
