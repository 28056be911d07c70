//! 外部调用超时控制

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SeckillError};

/// 在给定时限内执行外部调用，超时转为 `SeckillError::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SeckillError::timeout(operation))?
}
