//! 订单消息消费者
//!
//! 把准入成功的临时订单持久化到账本，并扣减权威库存。
//!
//! `OrderConsumer::handle` 对每条消息给出处理结论（Ack / RetryLater / DeadLetter），
//! 不在内部循环重试；重投由 `OrderConsumerRuntime` 统一驱动：
//! - Ack：提交 offset
//! - RetryLater：退避后带递增的重投计数重新发布同一消息，再提交 offset
//! - DeadLetter：写入补偿任务（账本不可用时停放到死信 topic），再提交 offset
//! - 以上都失败时不提交 offset，消费循环原地重试该消息

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use seckill_shared::config::{AppConfig, SeckillConfig};
use seckill_shared::dlq::DlqProducer;
use seckill_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, headers};
use seckill_shared::observability::metrics;
use seckill_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, SeckillError};
use crate::models::{NewCompensationTask, PersistOutcome, ProvisionalOrder};
use crate::repository::OrderLedger;
use crate::timeout::with_timeout;

/// 单条消息的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// 处理完成（包括重复投递、售罄、格式错误丢弃）
    Ack,
    /// 瞬时故障，需要重投
    RetryLater { error: String },
    /// 重投预算耗尽或不可恢复，转入补偿流程
    DeadLetter { error: String },
}

impl ConsumeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::RetryLater { .. } => "retry_later",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// 订单消费者
pub struct OrderConsumer {
    ledger: Arc<dyn OrderLedger>,
    ledger_timeout: Duration,
    max_redeliveries: u32,
}

impl OrderConsumer {
    pub fn new(ledger: Arc<dyn OrderLedger>, config: &SeckillConfig) -> Self {
        Self {
            ledger,
            ledger_timeout: config.ledger_timeout(),
            max_redeliveries: config.max_redeliveries,
        }
    }

    /// 处理一条订单消息
    #[instrument(skip(self, msg), fields(key = ?msg.key, offset = msg.offset))]
    pub async fn handle(&self, msg: &ConsumerMessage) -> ConsumeOutcome {
        // 1. 格式错误的消息永远无法成功，直接确认丢弃
        let order: ProvisionalOrder = match msg.deserialize_payload() {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, partition = msg.partition, "订单消息格式错误，丢弃");
                metrics::record_consumer_outcome("malformed");
                return ConsumeOutcome::Ack;
            }
        };

        let dedupe_key = dedupe_key(msg, &order);

        // 2/3. 同一事务内写订单并条件扣减，去重键保证重投无副作用
        let persisted = with_timeout(
            self.ledger_timeout,
            "ledger.persist_admission",
            self.ledger.persist_admission(&order, &dedupe_key),
        )
        .await;

        let outcome = match persisted {
            Ok(PersistOutcome::Created(order_id)) => {
                info!(order_id, user_id = order.user_id, item_id = order.item_id, "订单已持久化");
                ConsumeOutcome::Ack
            }
            Ok(PersistOutcome::Duplicate(order_id)) => {
                info!(order_id, %dedupe_key, "重复投递，订单已存在");
                ConsumeOutcome::Ack
            }
            Ok(PersistOutcome::Exhausted) => {
                // 缓存预热不准时可能出现，重试也不会成功
                warn!(
                    item_id = order.item_id,
                    user_id = order.user_id,
                    %dedupe_key,
                    "权威库存已售罄，放弃该预占"
                );
                ConsumeOutcome::Ack
            }
            Err(e) => self.classify_failure(msg, &e),
        };

        metrics::record_consumer_outcome(outcome.label());
        outcome
    }

    fn classify_failure(&self, msg: &ConsumerMessage, err: &SeckillError) -> ConsumeOutcome {
        let redelivery_count = msg.redelivery_count();

        if !err.is_retryable() {
            error!(error = %err, redelivery_count, "订单持久化遇到不可重试错误");
            return ConsumeOutcome::DeadLetter {
                error: err.to_string(),
            };
        }

        if redelivery_count >= self.max_redeliveries {
            error!(
                error = %err,
                redelivery_count,
                max_redeliveries = self.max_redeliveries,
                "重投次数耗尽，转入补偿流程"
            );
            return ConsumeOutcome::DeadLetter {
                error: err.to_string(),
            };
        }

        warn!(error = %err, redelivery_count, "订单持久化失败，等待重投");
        ConsumeOutcome::RetryLater {
            error: err.to_string(),
        }
    }

    /// 为无法持久化的消息写入补偿任务，返回任务 ID
    #[instrument(skip(self, msg, last_error), fields(key = ?msg.key))]
    pub async fn save_compensation(&self, msg: &ConsumerMessage, last_error: &str) -> Result<i64> {
        let order: ProvisionalOrder = msg.deserialize_payload()?;
        let task = NewCompensationTask::from_order(
            &order,
            &dedupe_key(msg, &order),
            msg.redelivery_count(),
            last_error,
        );

        let task_id = with_timeout(
            self.ledger_timeout,
            "ledger.save_compensation_task",
            self.ledger.save_compensation_task(&task),
        )
        .await?;

        metrics::record_compensation_task();
        warn!(
            task_id,
            user_id = task.user_id,
            item_id = task.item_id,
            message_key = %task.message_key,
            "补偿任务已创建"
        );
        Ok(task_id)
    }
}

/// 消息 key，空字符串视为缺失
fn message_key(msg: &ConsumerMessage) -> Option<&str> {
    msg.key.as_deref().filter(|k| !k.is_empty())
}

/// 去重键取自原始消息 key，缺失时由预占 ID 重新生成
fn dedupe_key(msg: &ConsumerMessage, order: &ProvisionalOrder) -> String {
    message_key(msg)
        .map(String::from)
        .unwrap_or_else(|| order.message_key())
}

/// 重投与停放使用的 key，与消费时的去重键一致
fn outgoing_key(msg: &ConsumerMessage) -> String {
    match message_key(msg) {
        Some(key) => key.to_string(),
        None => msg
            .deserialize_payload::<ProvisionalOrder>()
            .map(|order| order.message_key())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Kafka 运行时
// ============================================================================

/// 重投与死信的投递出口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedeliverySink: Send + Sync {
    /// 以给定的重投计数把消息重新发布到原 topic
    async fn republish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        redelivery_count: u32,
    ) -> Result<()>;

    /// 停放到死信 topic
    async fn park(
        &self,
        key: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        redelivery_count: u32,
    ) -> Result<()>;
}

/// 基于 KafkaProducer 的投递出口
pub struct KafkaRedeliverySink {
    producer: KafkaProducer,
    dlq: DlqProducer,
    tag: String,
}

impl KafkaRedeliverySink {
    pub fn new(producer: KafkaProducer, service_name: &str, tag: impl Into<String>) -> Self {
        Self {
            dlq: DlqProducer::new(producer.clone(), service_name),
            producer,
            tag: tag.into(),
        }
    }
}

#[async_trait]
impl RedeliverySink for KafkaRedeliverySink {
    async fn republish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        redelivery_count: u32,
    ) -> Result<()> {
        let count = redelivery_count.to_string();
        self.producer
            .send_with_headers(
                topic,
                key,
                payload,
                &[
                    (headers::TAG, self.tag.as_str()),
                    (headers::REDELIVERY_COUNT, count.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn park(
        &self,
        key: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        redelivery_count: u32,
    ) -> Result<()> {
        self.dlq
            .park(key, source_topic, payload, error, redelivery_count)
            .await?;
        Ok(())
    }
}

/// 订单消费运行时
///
/// 组合 KafkaConsumer（消息拉取）、OrderConsumer（业务处理）和
/// RedeliverySink（重投/死信投递）三个组件，形成完整的消费管道。
pub struct OrderConsumerRuntime {
    consumer: KafkaConsumer,
    topic: String,
    pipeline: Pipeline,
}

struct Pipeline {
    handler: OrderConsumer,
    sink: Arc<dyn RedeliverySink>,
    policy: RetryPolicy,
}

impl OrderConsumerRuntime {
    pub fn new(
        config: &AppConfig,
        handler: OrderConsumer,
        producer: KafkaProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?;
        let seckill = &config.seckill;

        let policy = RetryPolicy::new(
            seckill.max_redeliveries,
            Duration::from_millis(seckill.redelivery_initial_delay_ms),
            Duration::from_millis(seckill.redelivery_max_delay_ms),
        );
        let sink = KafkaRedeliverySink::new(producer, &config.service_name, &seckill.order_tag);

        Ok(Self {
            consumer,
            topic: seckill.order_topic.clone(),
            pipeline: Pipeline {
                handler,
                sink: Arc::new(sink),
                policy,
            },
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            consumer,
            topic,
            pipeline,
        } = self;

        consumer.subscribe(&[topic.as_str()])?;
        info!(%topic, "订单消费者已启动");

        consumer
            .start(shutdown, |msg| {
                let pipeline = &pipeline;
                async move { pipeline.process(msg).await.map_err(into_shared) }
            })
            .await;

        info!("订单消费者已停止");
        Ok(())
    }
}

impl Pipeline {
    /// 返回 Ok 时提交 offset；Err 时消费循环原地重试同一条消息
    async fn process(&self, msg: ConsumerMessage) -> Result<()> {
        match self.handler.handle(&msg).await {
            ConsumeOutcome::Ack => Ok(()),
            ConsumeOutcome::RetryLater { error } => {
                let attempt = msg.redelivery_count();
                tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;

                match self.redeliver(&msg).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        // 无法重新发布时不能丢消息，直接转入补偿
                        warn!(error = %e, "重投发布失败，转入补偿流程");
                        self.park(&msg, &format!("{error}; 重投失败: {e}")).await
                    }
                }
            }
            ConsumeOutcome::DeadLetter { error } => self.park(&msg, &error).await,
        }
    }

    /// 以递增的重投计数重新发布同一 key 与负载
    async fn redeliver(&self, msg: &ConsumerMessage) -> Result<()> {
        let key = outgoing_key(msg);
        let next = msg.redelivery_count() + 1;

        self.sink
            .republish(&msg.topic, &key, &msg.payload, next)
            .await?;

        info!(%key, redelivery_count = next, "订单消息已重新发布");
        Ok(())
    }

    /// 写补偿任务，账本不可用时停放到死信 topic
    async fn park(&self, msg: &ConsumerMessage, error: &str) -> Result<()> {
        let compensation_err = match self.handler.save_compensation(msg, error).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        warn!(error = %compensation_err, "补偿任务写入失败，停放到死信队列");

        let payload = String::from_utf8_lossy(&msg.payload);
        self.sink
            .park(
                &outgoing_key(msg),
                &msg.topic,
                &payload,
                &format!("{error}; 补偿任务写入失败: {compensation_err}"),
                msg.redelivery_count(),
            )
            .await
    }
}

/// 消费循环只需要区分成功与失败，失败时 offset 不提交
fn into_shared(err: SeckillError) -> seckill_shared::error::SeckillError {
    seckill_shared::error::SeckillError::Internal(err.to_string())
}
