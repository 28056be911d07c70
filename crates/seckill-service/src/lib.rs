//! 秒杀库存准入核心
//!
//! 在高并发下决定稀缺库存能否售出，并把准入结果交给消息队列异步持久化。
//!
//! ## 核心流程
//!
//! - **准入**：缓存原子扣减 -> 投递订单消息 -> 投递失败时回滚缓存
//! - **持久化**：消费者在同一事务内写订单并条件扣减账本库存，按去重 key 保证幂等
//! - **补偿**：重投预算耗尽的消息转为补偿任务，由对账流程处理
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `cache`: 库存工作副本（StockCache）
//! - `queue`: 订单消息生产者（OrderQueue）
//! - `repository`: 账本仓储（OrderLedger）
//! - `consumer`: 订单消息消费者
//! - `service`: 准入编排服务
//! - `test_utils`: 内存版协作者，供测试替换外部依赖

pub mod cache;
pub mod consumer;
pub mod error;
pub mod models;
pub mod queue;
pub mod repository;
pub mod service;
pub mod test_utils;
pub mod timeout;

pub use cache::{RedisStockCache, StockCache};
pub use consumer::{
    ConsumeOutcome, KafkaRedeliverySink, OrderConsumer, OrderConsumerRuntime, RedeliverySink,
};
pub use error::{Result, SeckillError};
pub use models::*;
pub use queue::{KafkaOrderQueue, OrderQueue};
pub use repository::{OrderLedger, PgOrderLedger};
pub use service::{SeckillOutcome, SeckillService};
