//! 订单、订单消息与补偿任务定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CompensationStatus, OrderStatus};

/// 订单消息 key 前缀
pub const ORDER_KEY_PREFIX: &str = "order_";

/// 已持久化的订单
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub item_id: i64,
    pub status: OrderStatus,
    /// 由消息 key 派生的去重键
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 准入成功后投递到队列的临时订单
///
/// 尚无账本 ID，以 `reservation_id` 标识一次预占；消费者落库后才分配真实 ID。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionalOrder {
    pub reservation_id: Uuid,
    pub user_id: i64,
    pub item_id: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl ProvisionalOrder {
    pub fn new(user_id: i64, item_id: i64) -> Self {
        Self {
            reservation_id: Uuid::now_v7(),
            user_id,
            item_id,
            status: OrderStatus::PendingPayment,
            created_at: Utc::now(),
        }
    }

    /// 消息 key：`order_<reservation_id>`
    pub fn message_key(&self) -> String {
        format!("{}{}", ORDER_KEY_PREFIX, self.reservation_id)
    }
}

/// 订单落库结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// 新建订单并完成权威扣减
    Created(i64),
    /// 同一去重键已落库，本次无任何副作用
    Duplicate(i64),
    /// 权威库存为零，事务已回滚
    Exhausted,
}

/// 补偿任务
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CompensationTask {
    pub id: i64,
    pub user_id: i64,
    pub item_id: i64,
    #[sqlx(default)]
    pub order_id: Option<i64>,
    pub message_key: String,
    pub status: CompensationStatus,
    pub retry_count: i32,
    #[sqlx(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建补偿任务请求
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompensationTask {
    pub user_id: i64,
    pub item_id: i64,
    pub order_id: Option<i64>,
    pub message_key: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

impl NewCompensationTask {
    /// 由重投耗尽的订单消息生成补偿任务
    pub fn from_order(
        order: &ProvisionalOrder,
        message_key: &str,
        redelivery_count: u32,
        last_error: impl Into<String>,
    ) -> Self {
        Self {
            user_id: order.user_id,
            item_id: order.item_id,
            order_id: None,
            message_key: message_key.to_string(),
            retry_count: redelivery_count as i32,
            last_error: Some(last_error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_order_message_key() {
        let order = ProvisionalOrder::new(1001, 1);
        let key = order.message_key();

        assert!(key.starts_with("order_"));
        assert_eq!(key, format!("order_{}", order.reservation_id));
        assert_eq!(order.status, OrderStatus::PendingPayment);
    }

    #[test]
    fn test_reservation_ids_are_unique() {
        let a = ProvisionalOrder::new(1, 1);
        let b = ProvisionalOrder::new(1, 1);
        assert_ne!(a.reservation_id, b.reservation_id);
        assert_ne!(a.message_key(), b.message_key());
    }

    #[test]
    fn test_provisional_order_wire_format() {
        let order = ProvisionalOrder::new(1001, 7);
        let json: serde_json::Value = serde_json::to_value(&order).unwrap();

        assert_eq!(json["userId"], 1001);
        assert_eq!(json["itemId"], 7);
        assert_eq!(json["status"], "PENDING_PAYMENT");
        assert!(json.get("reservationId").is_some());
        assert!(json.get("createdAt").is_some());
        // 临时订单没有账本 ID
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_compensation_task_from_order() {
        let order = ProvisionalOrder::new(9, 3);
        let task = NewCompensationTask::from_order(&order, &order.message_key(), 5, "db down");

        assert_eq!(task.user_id, 9);
        assert_eq!(task.item_id, 3);
        assert_eq!(task.order_id, None);
        assert_eq!(task.retry_count, 5);
        assert_eq!(task.last_error.as_deref(), Some("db down"));
    }
}
