//! test_utils 模块的集成测试

use seckill_shared::cache::CacheKey;
use seckill_shared::config::SeckillConfig;
use seckill_shared::test_utils::*;

#[test]
fn test_item_ids_are_unique() {
    let a = test_item_id();
    let b = test_item_id();
    assert_ne!(a, b);
}

#[test]
fn test_user_ids_are_unique() {
    let a = test_user_id();
    let b = test_user_id();
    assert_ne!(a, b);
    assert!(a > 0 && b > 0);
}

#[test]
fn test_redis_config_points_at_test_db() {
    let config = test_redis_config();
    assert!(config.url.starts_with("redis://"));
}

#[test]
fn test_kafka_config_reads_from_start() {
    let config = test_kafka_config();
    assert_eq!(config.auto_offset_reset, "earliest");
    assert!(config.consumer_group.ends_with("-test"));
}

#[test]
fn test_stock_key_uses_configured_prefix() {
    let config = SeckillConfig::default();
    let key = CacheKey::stock(&config.stock_key_prefix, test_item_id());
    assert!(key.starts_with("seckill:stock:"));
}
