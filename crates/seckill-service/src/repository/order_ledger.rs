//! PostgreSQL 订单账本

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};
use tracing::{debug, info, instrument, warn};

use super::traits::OrderLedger;
use crate::error::{Result, SeckillError};
use crate::models::{
    CompensationStatus, CompensationTask, Item, NewCompensationTask, Order, OrderStatus,
    PersistOutcome, ProvisionalOrder,
};

/// PostgreSQL 订单账本
#[derive(Clone)]
pub struct PgOrderLedger {
    pool: PgPool,
}

impl PgOrderLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件扣减，可在连接池或事务内执行
    async fn decrement_with<'e, E>(executor: E, item_id: i64) -> Result<bool>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET remaining_units = remaining_units - 1, updated_at = NOW()
            WHERE id = $1 AND remaining_units > 0
            "#,
        )
        .bind(item_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_order_id_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM orders WHERE dedupe_key = $1")
            .bind(dedupe_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    async fn existing_order_id(&self, dedupe_key: &str) -> Result<i64> {
        self.find_order_id_by_dedupe_key(dedupe_key)
            .await?
            .ok_or_else(|| {
                SeckillError::Internal(format!("去重键冲突但订单不存在: {dedupe_key}"))
            })
    }
}

#[async_trait]
impl OrderLedger for PgOrderLedger {
    // ==================== 商品 ====================

    async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(
            r#"
            SELECT id, name, description, total_units, remaining_units,
                   start_time, end_time, status, created_at, updated_at
            FROM items
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    #[instrument(skip(self))]
    async fn decrement_authoritative(&self, item_id: i64) -> Result<bool> {
        Self::decrement_with(&self.pool, item_id).await
    }

    #[instrument(skip(self))]
    async fn restock(&self, item_id: i64, units: i64) -> Result<i64> {
        if units <= 0 {
            return Err(SeckillError::Validation(format!(
                "补货数量必须为正数: {units}"
            )));
        }

        let remaining = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE items
            SET remaining_units = LEAST(total_units, remaining_units + $2), updated_at = NOW()
            WHERE id = $1
            RETURNING remaining_units
            "#,
        )
        .bind(item_id)
        .bind(units)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SeckillError::ItemNotFound(item_id))?;

        info!(item_id, units, remaining, "商品已补货");
        Ok(remaining)
    }

    // ==================== 订单 ====================

    #[instrument(skip(self, order), fields(user_id = order.user_id, item_id = order.item_id))]
    async fn create_order(&self, order: &ProvisionalOrder, dedupe_key: &str) -> Result<i64> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO orders (user_id, item_id, status, dedupe_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(order.user_id)
        .bind(order.item_id)
        .bind(order.status)
        .bind(dedupe_key)
        .bind(order.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(id),
            None => self.existing_order_id(dedupe_key).await,
        }
    }

    #[instrument(skip(self, order), fields(user_id = order.user_id, item_id = order.item_id))]
    async fn persist_admission(
        &self,
        order: &ProvisionalOrder,
        dedupe_key: &str,
    ) -> Result<PersistOutcome> {
        let mut tx = self.pool.begin().await?;

        // 并发的同键写入会阻塞在唯一索引上，直到前一个事务结束
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO orders (user_id, item_id, status, dedupe_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (dedupe_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(order.user_id)
        .bind(order.item_id)
        .bind(order.status)
        .bind(dedupe_key)
        .bind(order.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order_id) = inserted else {
            tx.rollback().await?;
            let existing = self.existing_order_id(dedupe_key).await?;
            debug!(dedupe_key, order_id = existing, "订单已存在，跳过重复投递");
            return Ok(PersistOutcome::Duplicate(existing));
        };

        if !Self::decrement_with(&mut *tx, order.item_id).await? {
            tx.rollback().await?;
            warn!(item_id = order.item_id, dedupe_key, "权威库存已为零，订单未创建");
            return Ok(PersistOutcome::Exhausted);
        }

        tx.commit().await?;

        info!(order_id, item_id = order.item_id, dedupe_key, "订单已落库");
        Ok(PersistOutcome::Created(order_id))
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, item_id, status, dedupe_key, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SeckillError::OrderNotFound(order_id));
        }
        Ok(())
    }

    // ==================== 补偿任务 ====================

    #[instrument(skip(self, task), fields(message_key = %task.message_key))]
    async fn save_compensation_task(&self, task: &NewCompensationTask) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO compensation_tasks
                (user_id, item_id, order_id, message_key, status, retry_count, last_error,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(task.user_id)
        .bind(task.item_id)
        .bind(task.order_id)
        .bind(&task.message_key)
        .bind(CompensationStatus::Pending)
        .bind(task.retry_count)
        .bind(&task.last_error)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_pending_compensation_tasks(&self, limit: i64) -> Result<Vec<CompensationTask>> {
        let tasks = sqlx::query_as::<_, CompensationTask>(
            r#"
            SELECT id, user_id, item_id, order_id, message_key, status, retry_count,
                   last_error, created_at, updated_at
            FROM compensation_tasks
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(CompensationStatus::Pending)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn update_compensation_task_status(
        &self,
        task_id: i64,
        status: CompensationStatus,
        retry_count: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE compensation_tasks
            SET status = $2, retry_count = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(status)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SeckillError::Internal(format!("补偿任务不存在: {task_id}")));
        }
        Ok(())
    }
}
