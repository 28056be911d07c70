//! 基于 Redis 的库存缓存实现

use async_trait::async_trait;
use redis::Script;
use seckill_shared::cache::{Cache, CacheKey};
use tracing::{debug, instrument};

use super::StockCache;
use crate::error::Result;

/// 脚本返回该值表示库存不足或 key 不存在
pub const EXHAUSTED_SENTINEL: i64 = -1;

/// 检查并扣减库存的 Lua 脚本
///
/// GET -> 下限检查 -> DECR 在 Redis 内一次执行完成，与其他客户端的命令不会交错。
pub const DECREMENT_SCRIPT: &str = r#"
local stock = tonumber(redis.call('GET', KEYS[1]))
if stock == nil or stock <= 0 then
    return -1
end
return redis.call('DECR', KEYS[1])
"#;

/// Redis 库存缓存
pub struct RedisStockCache {
    cache: Cache,
    key_prefix: String,
    decrement_script: Script,
}

impl RedisStockCache {
    pub fn new(cache: Cache, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            decrement_script: Script::new(DECREMENT_SCRIPT),
        }
    }

    fn key(&self, item_id: i64) -> String {
        CacheKey::stock(&self.key_prefix, item_id)
    }
}

/// 将脚本返回值转换为扣减结果，哨兵值表示售罄
fn decode_decrement(raw: i64) -> Option<i64> {
    if raw == EXHAUSTED_SENTINEL {
        None
    } else {
        Some(raw)
    }
}

#[async_trait]
impl StockCache for RedisStockCache {
    #[instrument(skip(self))]
    async fn decrement(&self, item_id: i64) -> Result<Option<i64>> {
        let key = self.key(item_id);
        let raw: i64 = self
            .cache
            .eval_script(&self.decrement_script, &[&key], &[])
            .await?;

        let remaining = decode_decrement(raw);
        debug!(item_id, ?remaining, "库存扣减脚本执行完成");
        Ok(remaining)
    }

    #[instrument(skip(self))]
    async fn increment(&self, item_id: i64, delta: i64) -> Result<i64> {
        let value = self.cache.incr(&self.key(item_id), delta).await?;
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn set(&self, item_id: i64, count: i64) -> Result<()> {
        self.cache.set_i64(&self.key(item_id), count).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn seed(&self, item_id: i64, count: i64) -> Result<bool> {
        let written = self
            .cache
            .set_i64_if_absent(&self.key(item_id), count)
            .await?;
        Ok(written)
    }

    async fn get(&self, item_id: i64) -> Result<Option<i64>> {
        let value = self.cache.get_i64(&self.key(item_id)).await?;
        Ok(value)
    }
}
