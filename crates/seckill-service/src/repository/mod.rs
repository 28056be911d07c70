//! 账本仓储层
//!
//! 商品、订单、补偿任务的持久化存储，是权威库存的唯一来源。
//!
//! ## 设计原则
//!
//! - 库存扣减是带条件的单条 UPDATE，影响行数为 0 即表示售罄
//! - 订单写入与权威扣减在同一事务内完成，按去重键保证幂等
//! - 定义 trait 接口以支持 mock 测试

mod order_ledger;
mod traits;

pub use order_ledger::PgOrderLedger;
pub use traits::*;
