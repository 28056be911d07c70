//! 测试工具模块
//!
//! 提供 StockCache、OrderQueue、OrderLedger 的内存实现，
//! 让集成测试无需 Redis / Kafka / PostgreSQL 即可驱动完整的准入与消费流程。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use seckill_shared::kafka::{ConsumerMessage, headers};

use crate::cache::StockCache;
use crate::error::{Result, SeckillError};
use crate::models::{
    CompensationStatus, CompensationTask, Item, ItemStatus, NewCompensationTask, Order,
    OrderStatus, PersistOutcome, ProvisionalOrder,
};
use crate::queue::OrderQueue;
use crate::repository::OrderLedger;

/// 剩余的注入失败次数，每次调用消耗一次
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ==================== StockCache ====================

/// 内存库存缓存
///
/// 每个 key 的检查与扣减在 DashMap 分片锁内完成，与 Lua 脚本同样不可分割。
#[derive(Default)]
pub struct InMemoryStockCache {
    counts: DashMap<i64, i64>,
}

impl InMemoryStockCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockCache for InMemoryStockCache {
    async fn decrement(&self, item_id: i64) -> Result<Option<i64>> {
        match self.counts.get_mut(&item_id) {
            Some(mut count) if *count > 0 => {
                *count -= 1;
                Ok(Some(*count))
            }
            _ => Ok(None),
        }
    }

    async fn increment(&self, item_id: i64, delta: i64) -> Result<i64> {
        let mut count = self.counts.entry(item_id).or_insert(0);
        *count += delta;
        Ok(*count)
    }

    async fn set(&self, item_id: i64, count: i64) -> Result<()> {
        self.counts.insert(item_id, count);
        Ok(())
    }

    async fn seed(&self, item_id: i64, count: i64) -> Result<bool> {
        match self.counts.entry(item_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(count);
                Ok(true)
            }
        }
    }

    async fn get(&self, item_id: i64) -> Result<Option<i64>> {
        Ok(self.counts.get(&item_id).map(|c| *c))
    }
}

// ==================== OrderQueue ====================

/// 已投递的消息
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    /// 转换为消费者收到的消息
    pub fn to_consumer_message(&self, redelivery_count: u32) -> ConsumerMessage {
        let mut message_headers = HashMap::new();
        if redelivery_count > 0 {
            message_headers.insert(
                headers::REDELIVERY_COUNT.to_string(),
                redelivery_count.to_string(),
            );
        }

        ConsumerMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset: 0,
            key: Some(self.key.clone()),
            payload: self.payload.clone(),
            timestamp: None,
            headers: message_headers,
        }
    }
}

/// 内存订单队列，可注入投递失败
#[derive(Default)]
pub struct InMemoryOrderQueue {
    sent: DashMap<String, SentMessage>,
    failures: AtomicUsize,
}

impl InMemoryOrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 n 次投递返回错误
    pub fn fail_next_sends(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl OrderQueue for InMemoryOrderQueue {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        if take_failure(&self.failures) {
            return Err(SeckillError::Queue(format!("注入的投递失败: {key}")));
        }

        self.sent.insert(
            key.to_string(),
            SentMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }
}

// ==================== OrderLedger ====================

/// 内存订单账本，可注入持久化失败
#[derive(Default)]
pub struct InMemoryOrderLedger {
    items: DashMap<i64, Item>,
    orders: DashMap<i64, Order>,
    dedupe_index: DashMap<String, i64>,
    tasks: DashMap<i64, CompensationTask>,
    next_id: AtomicI64,
    persist_failures: AtomicUsize,
    decrement_calls: AtomicUsize,
}

impl InMemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 写入一个售卖中的商品
    pub fn seed_item(&self, item_id: i64, units: i64) {
        let now = Utc::now();
        self.items.insert(
            item_id,
            Item {
                id: item_id,
                name: format!("秒杀商品-{item_id}"),
                description: None,
                total_units: units,
                remaining_units: units,
                start_time: now - Duration::hours(1),
                end_time: now + Duration::hours(1),
                status: ItemStatus::Active,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// 之后的 n 次 persist_admission 返回瞬时错误
    pub fn fail_next_persists(&self, n: usize) {
        self.persist_failures.store(n, Ordering::SeqCst);
    }

    pub fn remaining_units(&self, item_id: i64) -> Option<i64> {
        self.items.get(&item_id).map(|i| i.remaining_units)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn orders_for_item(&self, item_id: i64) -> usize {
        self.orders.iter().filter(|o| o.item_id == item_id).count()
    }

    /// 成功生效的权威扣减次数
    pub fn decrement_count(&self) -> usize {
        self.decrement_calls.load(Ordering::SeqCst)
    }

    fn try_decrement(&self, item_id: i64) -> bool {
        match self.items.get_mut(&item_id) {
            Some(mut item) if item.remaining_units > 0 => {
                item.remaining_units -= 1;
                item.updated_at = Utc::now();
                self.decrement_calls.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    fn insert_order(&self, order: &ProvisionalOrder, dedupe_key: &str) -> i64 {
        let id = self.next_id();
        self.orders.insert(
            id,
            Order {
                id,
                user_id: order.user_id,
                item_id: order.item_id,
                status: order.status,
                dedupe_key: dedupe_key.to_string(),
                created_at: order.created_at,
                updated_at: Utc::now(),
            },
        );
        id
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        Ok(self.items.get(&item_id).map(|i| i.value().clone()))
    }

    async fn decrement_authoritative(&self, item_id: i64) -> Result<bool> {
        Ok(self.try_decrement(item_id))
    }

    async fn restock(&self, item_id: i64, units: i64) -> Result<i64> {
        if units <= 0 {
            return Err(SeckillError::Validation(format!(
                "补货数量必须为正数: {units}"
            )));
        }
        let mut item = self
            .items
            .get_mut(&item_id)
            .ok_or(SeckillError::ItemNotFound(item_id))?;
        item.remaining_units = (item.remaining_units + units).min(item.total_units);
        Ok(item.remaining_units)
    }

    async fn create_order(&self, order: &ProvisionalOrder, dedupe_key: &str) -> Result<i64> {
        match self.dedupe_index.entry(dedupe_key.to_string()) {
            Entry::Occupied(existing) => Ok(*existing.get()),
            Entry::Vacant(slot) => {
                let id = self.insert_order(order, dedupe_key);
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn persist_admission(
        &self,
        order: &ProvisionalOrder,
        dedupe_key: &str,
    ) -> Result<PersistOutcome> {
        if take_failure(&self.persist_failures) {
            return Err(SeckillError::timeout("ledger.persist_admission"));
        }

        // 去重分片锁持有到写入完成，等价于唯一索引上的事务串行
        match self.dedupe_index.entry(dedupe_key.to_string()) {
            Entry::Occupied(existing) => Ok(PersistOutcome::Duplicate(*existing.get())),
            Entry::Vacant(slot) => {
                if !self.try_decrement(order.item_id) {
                    return Ok(PersistOutcome::Exhausted);
                }
                let id = self.insert_order(order, dedupe_key);
                slot.insert(id);
                Ok(PersistOutcome::Created(id))
            }
        }
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        Ok(self.orders.get(&order_id).map(|o| o.value().clone()))
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(SeckillError::OrderNotFound(order_id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn save_compensation_task(&self, task: &NewCompensationTask) -> Result<i64> {
        let id = self.next_id();
        let now = Utc::now();
        self.tasks.insert(
            id,
            CompensationTask {
                id,
                user_id: task.user_id,
                item_id: task.item_id,
                order_id: task.order_id,
                message_key: task.message_key.clone(),
                status: CompensationStatus::Pending,
                retry_count: task.retry_count,
                last_error: task.last_error.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_pending_compensation_tasks(&self, limit: i64) -> Result<Vec<CompensationTask>> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.status == CompensationStatus::Pending)
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn update_compensation_task_status(
        &self,
        task_id: i64,
        status: CompensationStatus,
        retry_count: i32,
    ) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SeckillError::Internal(format!("补偿任务不存在: {task_id}")))?;
        task.status = status;
        task.retry_count = retry_count;
        task.updated_at = Utc::now();
        Ok(())
    }
}
