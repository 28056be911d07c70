//! 仓储 Trait 定义

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CompensationStatus, CompensationTask, Item, NewCompensationTask, Order, OrderStatus,
    PersistOutcome, ProvisionalOrder,
};

/// 订单账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderLedger: Send + Sync {
    // 商品
    async fn get_item(&self, item_id: i64) -> Result<Option<Item>>;

    /// 条件扣减权威库存，返回 false 表示库存已为零
    async fn decrement_authoritative(&self, item_id: i64) -> Result<bool>;

    /// 增加权威库存（运营补货），不超过 total_units，返回补货后的剩余量
    async fn restock(&self, item_id: i64, units: i64) -> Result<i64>;

    // 订单
    /// 按去重键写入订单，键已存在时返回已有订单 ID
    async fn create_order(&self, order: &ProvisionalOrder, dedupe_key: &str) -> Result<i64>;

    /// 在同一事务内写入订单并条件扣减权威库存
    async fn persist_admission(
        &self,
        order: &ProvisionalOrder,
        dedupe_key: &str,
    ) -> Result<PersistOutcome>;

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>>;
    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> Result<()>;

    // 补偿任务
    async fn save_compensation_task(&self, task: &NewCompensationTask) -> Result<i64>;
    async fn get_pending_compensation_tasks(&self, limit: i64) -> Result<Vec<CompensationTask>>;
    async fn update_compensation_task_status(
        &self,
        task_id: i64,
        status: CompensationStatus,
        retry_count: i32,
    ) -> Result<()>;
}
