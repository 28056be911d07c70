//! 秒杀订单工作进程
//!
//! 启动时用账本库存预热缓存，随后消费订单消息完成异步持久化。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use seckill_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    kafka::KafkaProducer,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use seckill::{
    KafkaOrderQueue, OrderConsumer, OrderConsumerRuntime, PgOrderLedger, RedisStockCache,
    SeckillError, SeckillService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/default.toml -> 环境 -> 服务 -> SECKILL_ 环境变量
    let config = AppConfig::load("seckill-worker").unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting seckill-worker...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 4. 初始化 Redis 缓存
    let cache = Cache::new(&config.redis).await?;
    cache.health_check().await?;
    info!("Redis connection established");

    // 5. 初始化 Kafka 生产者
    let producer = KafkaProducer::new(&config.kafka)?;

    // 6. 组装协作者
    let ledger = Arc::new(PgOrderLedger::new(db.pool().clone()));
    let stock_cache = Arc::new(RedisStockCache::new(
        cache,
        config.seckill.stock_key_prefix.clone(),
    ));
    let queue = Arc::new(KafkaOrderQueue::new(
        producer.clone(),
        config.seckill.order_tag.clone(),
    ));

    let service = SeckillService::new(stock_cache, queue, ledger.clone(), config.seckill.clone());

    // 7. 预热库存，缓存已有计数的商品保持不变；瞬时故障按退避重试
    warm_up(&service, &config.seckill.warmup_item_ids).await?;

    // 8. 启动订单消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler = OrderConsumer::new(ledger, &config.seckill);
    let runtime = OrderConsumerRuntime::new(&config, handler, producer)?;

    // 9. 收到关闭信号后通知消费循环退出，当前消息处理完成后返回
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    runtime.run(shutdown_rx).await?;

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 逐个商品预热缓存
async fn warm_up(service: &SeckillService, item_ids: &[i64]) -> Result<()> {
    if item_ids.is_empty() {
        warn!("No warm-up items configured, admissions will report exhausted until InitStock runs");
        return Ok(());
    }

    let policy = RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2));

    for &item_id in item_ids {
        let remaining = retry_with_policy(
            &policy,
            "init_stock",
            SeckillError::is_retryable,
            || service.init_stock(item_id),
        )
        .await?;

        info!(item_id, remaining, "Stock warmed up");
    }

    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
