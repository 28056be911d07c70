//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和计数器、脚本等常用缓存操作封装。
//!
//! 连接在创建时建立一次，之后每个操作克隆 `ConnectionManager` 复用同一条
//! 多路复用连接，断线时由 manager 自动重连。

use crate::config::RedisConfig;
use crate::error::{Result, SeckillError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, FromRedisValue, Script};
use tracing::{info, instrument};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    conn_manager: ConnectionManager,
}

impl Cache {
    /// 创建 Redis 客户端并建立连接
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn_manager = ConnectionManager::new(client).await?;
        info!("Redis connection manager created");
        Ok(Self { conn_manager })
    }

    /// 获取连接句柄，克隆开销只是一次引用计数
    pub fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SeckillError::from)
    }

    /// 读取整数值，key 不存在时返回 None
    #[instrument(skip(self))]
    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    /// 写入整数值（不过期）
    #[instrument(skip(self))]
    pub async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    /// 增量操作（INCRBY），返回增量后的值
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection();
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    /// 仅在 key 不存在时写入（SET NX），返回是否写入
    #[instrument(skip(self))]
    pub async fn set_i64_if_absent(&self, key: &str, value: i64) -> Result<bool> {
        let mut conn = self.connection();
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    /// 在服务端执行 Lua 脚本
    ///
    /// 脚本在 Redis 内单线程执行，整段逻辑对其他客户端不可分割。
    /// 内部使用 EVALSHA，脚本未缓存时自动回退到 EVAL。
    pub async fn eval_script<T>(&self, script: &Script, keys: &[&str], args: &[i64]) -> Result<T>
    where
        T: FromRedisValue,
    {
        let mut conn = self.connection();
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(*arg);
        }
        let result: T = invocation.invoke_async(&mut conn).await?;
        Ok(result)
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 商品工作库存：`<prefix>:<item_id>`
    pub fn stock(prefix: &str, item_id: i64) -> String {
        format!("{}:{}", prefix, item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_generation() {
        assert_eq!(CacheKey::stock("seckill:stock", 1), "seckill:stock:1");
        assert_eq!(CacheKey::stock("flash", 42), "flash:42");
    }
}
