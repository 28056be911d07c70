//! 秒杀准入服务
//!
//! 处理单次秒杀请求：缓存原子扣减 -> 构造临时订单 -> 投递订单消息。
//!
//! ## 状态流转
//!
//! 未开始 -> 已预占 -> 已入队；唯一的失败边是 已预占 -> 已回滚。
//! 调用返回前每个预占要么入队，要么回滚，不会悬空。
//!
//! ## 并发控制策略
//!
//! - 缓存的检查并扣减是唯一同步点，服务本身不持有可变共享状态
//! - 不在扣减前加分布式锁，原子脚本已经串行化了同一商品的竞争
//! - 回滚使用原子 INCRBY，与扣减可交换，延迟执行也安全

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use seckill_shared::config::SeckillConfig;
use seckill_shared::observability::metrics;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::StockCache;
use crate::error::{Result, SeckillError};
use crate::models::{Item, ProvisionalOrder};
use crate::queue::OrderQueue;
use crate::repository::OrderLedger;
use crate::timeout::with_timeout;

/// 准入结果
///
/// 售罄是正常业务结果而非错误；系统故障通过 `Err` 返回且已完成回滚。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeckillOutcome {
    /// 已预占并入队，订单 ID 由消费者异步分配
    Admitted {
        reservation_id: Uuid,
        message_key: String,
        /// 扣减后的缓存工作库存
        remaining: i64,
    },
    /// 库存售罄或未预热
    Exhausted,
}

impl SeckillOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::Exhausted => "exhausted",
        }
    }
}

/// 秒杀准入服务
pub struct SeckillService {
    cache: Arc<dyn StockCache>,
    queue: Arc<dyn OrderQueue>,
    ledger: Arc<dyn OrderLedger>,
    config: SeckillConfig,
}

impl SeckillService {
    pub fn new(
        cache: Arc<dyn StockCache>,
        queue: Arc<dyn OrderQueue>,
        ledger: Arc<dyn OrderLedger>,
        config: SeckillConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            ledger,
            config,
        }
    }

    /// 执行一次秒杀准入
    #[instrument(skip(self))]
    pub async fn seckill(&self, user_id: i64, item_id: i64) -> Result<SeckillOutcome> {
        let started = Instant::now();
        let result = self.admit(user_id, item_id).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::record_admission(label, started.elapsed().as_secs_f64());

        result
    }

    async fn admit(&self, user_id: i64, item_id: i64) -> Result<SeckillOutcome> {
        if user_id <= 0 || item_id <= 0 {
            return Err(SeckillError::Validation(format!(
                "非法的请求参数: user_id={user_id}, item_id={item_id}"
            )));
        }

        // 1. 缓存原子扣减；超时视为失败，脚本在服务端要么整体执行要么未执行
        let reserved = with_timeout(
            self.config.cache_timeout(),
            "stock.decrement",
            self.cache.decrement(item_id),
        )
        .await?;

        let Some(remaining) = reserved else {
            info!(user_id, item_id, "库存已售罄");
            return Ok(SeckillOutcome::Exhausted);
        };

        // 2. 构造临时订单
        let order = ProvisionalOrder::new(user_id, item_id);
        let message_key = order.message_key();

        let payload = match serde_json::to_vec(&order) {
            Ok(payload) => payload,
            Err(e) => {
                self.rollback(item_id, &message_key).await;
                return Err(e.into());
            }
        };

        // 3. 同步投递，broker 确认后才算入队
        if let Err(e) = self
            .queue
            .send(&self.config.order_topic, &message_key, &payload)
            .await
        {
            warn!(user_id, item_id, %message_key, error = %e, "订单消息投递失败，回滚预占");
            // 4. 投递失败必须回滚，调用方拿到的是可重试的系统错误
            self.rollback(item_id, &message_key).await;
            return Err(e);
        }

        info!(
            user_id,
            item_id,
            %message_key,
            remaining,
            "秒杀准入成功，订单已入队"
        );

        Ok(SeckillOutcome::Admitted {
            reservation_id: order.reservation_id,
            message_key,
            remaining,
        })
    }

    /// 归还一个预占单位
    async fn rollback(&self, item_id: i64, message_key: &str) {
        match with_timeout(
            self.config.cache_timeout(),
            "stock.increment",
            self.cache.increment(item_id, 1),
        )
        .await
        {
            Ok(count) => {
                metrics::record_rollback("restored");
                info!(item_id, message_key, count, "预占已回滚");
            }
            // 回滚失败只会少卖，不会超卖
            Err(e) => {
                metrics::record_rollback("failed");
                error!(item_id, message_key, error = %e, "预占回滚失败，工作库存偏低");
            }
        }
    }

    /// 查询商品，状态按当前时间推导
    pub async fn get_item(&self, item_id: i64) -> Result<Item> {
        let item = with_timeout(
            self.config.ledger_timeout(),
            "ledger.get_item",
            self.ledger.get_item(item_id),
        )
        .await?
        .ok_or(SeckillError::ItemNotFound(item_id))?;

        Ok(item.with_derived_status(Utc::now()))
    }

    /// 用账本权威库存预热缓存
    ///
    /// 每个商品在接受准入前必须调用一次。缓存中已有计数时保持不变，
    /// 因为已入队但未消费的预占尚未反映到账本。返回当前工作库存。
    #[instrument(skip(self))]
    pub async fn init_stock(&self, item_id: i64) -> Result<i64> {
        let item = with_timeout(
            self.config.ledger_timeout(),
            "ledger.get_item",
            self.ledger.get_item(item_id),
        )
        .await?
        .ok_or(SeckillError::ItemNotFound(item_id))?;

        let seeded = with_timeout(
            self.config.cache_timeout(),
            "stock.seed",
            self.cache.seed(item_id, item.remaining_units),
        )
        .await?;

        if seeded {
            info!(item_id, remaining = item.remaining_units, "库存已预热");
            return Ok(item.remaining_units);
        }

        let working = with_timeout(
            self.config.cache_timeout(),
            "stock.get",
            self.cache.get(item_id),
        )
        .await?
        .unwrap_or(0);

        info!(
            item_id,
            working,
            ledger_remaining = item.remaining_units,
            "缓存已有工作库存，跳过预热"
        );
        Ok(working)
    }
}
