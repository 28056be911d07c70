//! PostgreSQL 账本集成测试
//!
//! 需要可用的数据库，通过 TEST_DATABASE_URL 指定：
//! `cargo test -p seckill-service --test ledger_integration_test -- --ignored`

use std::sync::Arc;

use chrono::{Duration, Utc};
use seckill::{
    CompensationStatus, NewCompensationTask, OrderLedger, OrderStatus, PersistOutcome,
    PgOrderLedger, ProvisionalOrder, SeckillError,
};
use seckill_shared::database::Database;
use seckill_shared::test_utils::{test_database_config, test_user_id};

async fn setup() -> (Database, PgOrderLedger) {
    let db = Database::connect(&test_database_config())
        .await
        .expect("连接测试数据库失败");
    db.run_migrations().await.expect("执行迁移失败");
    let ledger = PgOrderLedger::new(db.pool().clone());
    (db, ledger)
}

async fn create_item(db: &Database, units: i64) -> i64 {
    let now = Utc::now();
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO items (name, total_units, remaining_units, start_time, end_time, status)
        VALUES ($1, $2, $2, $3, $4, 'ACTIVE')
        RETURNING id
        "#,
    )
    .bind("集成测试商品")
    .bind(units)
    .bind(now - Duration::hours(1))
    .bind(now + Duration::hours(1))
    .fetch_one(db.pool())
    .await
    .expect("创建测试商品失败")
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_persist_admission_is_idempotent() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 5).await;

    let order = ProvisionalOrder::new(test_user_id(), item_id);
    let key = order.message_key();

    let first = ledger.persist_admission(&order, &key).await.unwrap();
    let PersistOutcome::Created(order_id) = first else {
        panic!("expected created, got {first:?}");
    };

    let second = ledger.persist_admission(&order, &key).await.unwrap();
    assert_eq!(second, PersistOutcome::Duplicate(order_id));

    let item = ledger.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.remaining_units, 4);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_persist_admission_exhausted_rolls_back_order() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 0).await;

    let order = ProvisionalOrder::new(test_user_id(), item_id);
    let outcome = ledger
        .persist_admission(&order, &order.message_key())
        .await
        .unwrap();
    assert_eq!(outcome, PersistOutcome::Exhausted);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE item_id = $1")
        .bind(item_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_concurrent_authoritative_decrements_never_go_negative() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 10).await;
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.decrement_authoritative(item_id).await.unwrap() })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 10);
    let item = ledger.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.remaining_units, 0);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_restock_caps_at_total_units() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 3).await;

    assert!(ledger.decrement_authoritative(item_id).await.unwrap());
    assert_eq!(ledger.restock(item_id, 100).await.unwrap(), 3);

    let err = ledger.restock(item_id, 0).await.unwrap_err();
    assert!(matches!(err, SeckillError::Validation(_)));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_order_status_update() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 1).await;

    let order = ProvisionalOrder::new(test_user_id(), item_id);
    let order_id = ledger
        .create_order(&order, &order.message_key())
        .await
        .unwrap();

    ledger
        .update_order_status(order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    let stored = ledger.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);

    let err = ledger
        .update_order_status(-1, OrderStatus::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::OrderNotFound(-1)));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_compensation_task_lifecycle() {
    let (db, ledger) = setup().await;
    let item_id = create_item(&db, 1).await;

    let order = ProvisionalOrder::new(test_user_id(), item_id);
    let task_id = ledger
        .save_compensation_task(&NewCompensationTask::from_order(
            &order,
            &order.message_key(),
            5,
            "connection reset",
        ))
        .await
        .unwrap();

    let pending = ledger.get_pending_compensation_tasks(1000).await.unwrap();
    assert!(pending.iter().any(|t| t.id == task_id));

    ledger
        .update_compensation_task_status(task_id, CompensationStatus::InProgress, 6)
        .await
        .unwrap();
    let pending = ledger.get_pending_compensation_tasks(1000).await.unwrap();
    assert!(!pending.iter().any(|t| t.id == task_id));
}
