//! 秒杀枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 商品状态
///
/// 由售卖时间窗口推导，库中的 status 列仅作展示快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// 未开始
    #[default]
    NotStarted,
    /// 进行中
    Active,
    /// 已结束
    Ended,
}

impl ItemStatus {
    /// 根据售卖窗口 `[start, end)` 推导状态
    pub fn from_window(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < start {
            Self::NotStarted
        } else if now < end {
            Self::Active
        } else {
            Self::Ended
        }
    }
}

/// 订单状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 待支付 - 准入成功后的初始状态
    #[default]
    PendingPayment,
    Paid,
    Cancelled,
}

/// 补偿任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStatus {
    /// 待处理
    #[default]
    Pending,
    /// 对账流程已领取
    InProgress,
    Done,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_item_status_from_window() {
        let now = Utc::now();
        let start = now - Duration::hours(1);
        let end = now + Duration::hours(1);

        assert_eq!(ItemStatus::from_window(start, end, now), ItemStatus::Active);
        assert_eq!(
            ItemStatus::from_window(now + Duration::minutes(5), end, now),
            ItemStatus::NotStarted
        );
        assert_eq!(
            ItemStatus::from_window(start, now - Duration::minutes(5), now),
            ItemStatus::Ended
        );
    }

    #[test]
    fn test_item_status_window_edges() {
        let now = Utc::now();
        // 开始时刻视为进行中，结束时刻视为已结束
        assert_eq!(
            ItemStatus::from_window(now, now + Duration::hours(1), now),
            ItemStatus::Active
        );
        assert_eq!(
            ItemStatus::from_window(now - Duration::hours(1), now, now),
            ItemStatus::Ended
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PendingPayment).unwrap(),
            r#""PENDING_PAYMENT""#
        );
        assert_eq!(
            serde_json::to_string(&CompensationStatus::InProgress).unwrap(),
            r#""IN_PROGRESS""#
        );
        let status: ItemStatus = serde_json::from_str(r#""NOT_STARTED""#).unwrap();
        assert_eq!(status, ItemStatus::NotStarted);
    }
}
