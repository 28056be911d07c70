//! 库存缓存
//!
//! 持有每个商品剩余库存的工作副本，是准入路径上唯一的并发同步点。
//! 所有修改只能通过原子原语完成，调用方不得自行读-改-写。

mod redis_stock;

use async_trait::async_trait;

use crate::error::Result;

pub use redis_stock::{DECREMENT_SCRIPT, EXHAUSTED_SENTINEL, RedisStockCache};

/// 库存缓存接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StockCache: Send + Sync {
    /// 原子地检查并扣减一个单位
    ///
    /// 库存存在且大于 0 时扣减并返回扣减后的值；
    /// key 不存在或库存不大于 0 时不做任何修改，返回 `None`（售罄或未预热）。
    async fn decrement(&self, item_id: i64) -> Result<Option<i64>>;

    /// 原子地增加库存，仅用于回滚一次未能入队的扣减
    async fn increment(&self, item_id: i64, delta: i64) -> Result<i64>;

    /// 覆盖写入工作库存
    ///
    /// 会丢弃已发生的预占，只能在没有准入流量时使用。
    async fn set(&self, item_id: i64, count: i64) -> Result<()>;

    /// 仅在 key 不存在时写入工作库存，返回是否写入
    ///
    /// 预热使用该原语，重复预热不会覆盖售卖中的计数。
    async fn seed(&self, item_id: i64, count: i64) -> Result<bool>;

    /// 读取当前值，仅供诊断，不能用于准入判断
    async fn get(&self, item_id: i64) -> Result<Option<i64>>;
}
