//! 商品实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::ItemStatus;

/// 秒杀商品
///
/// `remaining_units` 是账本中的权威库存；缓存只持有由它预热出的工作副本。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub total_units: i64,
    pub remaining_units: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// 按当前时间推导的状态
    pub fn current_status(&self, now: DateTime<Utc>) -> ItemStatus {
        ItemStatus::from_window(self.start_time, self.end_time, now)
    }

    /// 用推导出的状态覆盖库中快照
    pub fn with_derived_status(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.current_status(now);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item() -> Item {
        let now = Utc::now();
        Item {
            id: 1,
            name: "限量优惠券".to_string(),
            description: None,
            total_units: 10,
            remaining_units: 10,
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            status: ItemStatus::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_with_derived_status_overrides_snapshot() {
        let item = item().with_derived_status(Utc::now());
        assert_eq!(item.status, ItemStatus::Active);
    }
}
