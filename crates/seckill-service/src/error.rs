//! 秒杀服务错误类型
//!
//! 定义服务层的业务错误和系统错误。库存售罄属于正常业务结果，
//! 在准入路径上以 `SeckillOutcome::Exhausted` 返回，不走错误通道。

use thiserror::Error;

/// 秒杀服务错误类型
#[derive(Debug, Error)]
pub enum SeckillError {
    // === 业务错误 ===
    #[error("商品不存在: {0}")]
    ItemNotFound(i64),

    #[error("订单不存在: {0}")]
    OrderNotFound(i64),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("消息队列错误: {0}")]
    Queue(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 秒杀服务 Result 类型别名
pub type Result<T> = std::result::Result<T, SeckillError>;

impl SeckillError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// 检查是否为可重试的错误
    ///
    /// 基础设施不可达或超时均可重试；业务结果与数据错误重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::Queue(_) | Self::Timeout { .. }
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound(_)
                | Self::OrderNotFound(_)
                | Self::Validation(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 基础设施错误映射到服务错误
impl From<seckill_shared::error::SeckillError> for SeckillError {
    fn from(err: seckill_shared::error::SeckillError) -> Self {
        use seckill_shared::error::SeckillError as Shared;

        match err {
            Shared::Database(e) => Self::Database(e),
            Shared::Redis(e) => Self::Redis(e.to_string()),
            Shared::Kafka(msg) => Self::Queue(msg),
            Shared::Timeout { operation } => Self::Timeout { operation },
            Shared::Serialization(e) => Self::Serialization(e),
            Shared::NotFound { entity, id } => Self::Internal(format!("{entity} 不存在: {id}")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for SeckillError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(SeckillError::Redis("connection refused".to_string()).is_retryable());
        assert!(SeckillError::Queue("broker down".to_string()).is_retryable());
        assert!(SeckillError::timeout("stock.decrement").is_retryable());
        assert!(!SeckillError::ItemNotFound(1).is_retryable());
        assert!(!SeckillError::Internal("bug".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(SeckillError::ItemNotFound(1).is_business_error());
        assert!(SeckillError::Validation("user_id=0".to_string()).is_business_error());
        assert!(SeckillError::OrderNotFound(7).is_business_error());
        assert!(!SeckillError::Queue("x".to_string()).is_business_error());
        assert!(!SeckillError::timeout("ledger").is_business_error());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(SeckillError::ItemNotFound(1).error_code(), "ITEM_NOT_FOUND");
        assert_eq!(SeckillError::timeout("x").error_code(), "TIMEOUT");
        assert_eq!(
            SeckillError::Queue("x".to_string()).error_code(),
            "QUEUE_ERROR"
        );
    }

    #[test]
    fn test_shared_error_mapping() {
        use seckill_shared::error::SeckillError as Shared;

        let err: SeckillError = Shared::Kafka("send failed".to_string()).into();
        assert!(matches!(err, SeckillError::Queue(ref m) if m == "send failed"));

        let err: SeckillError = Shared::Timeout {
            operation: "redis.eval".to_string(),
        }
        .into();
        assert!(matches!(err, SeckillError::Timeout { ref operation } if operation == "redis.eval"));

        let err: SeckillError = Shared::Internal("boom".to_string()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SeckillError::ItemNotFound(42);
        assert!(err.to_string().contains("42"));
    }
}
